//! Job processor: claim → dispatch → record, plus the stale-claim sweeper.
//!
//! One poll loop per [`WorkerType`] and one sweeper run as tokio tasks. The
//! loops share no mutable state; the claim statement is the only point where
//! they serialize.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::agent::intent::WorkerType;
use crate::agent::slots::ContextState;
use crate::agent::thread::NewTurn;
use crate::config::ProcessorConfig;
use crate::error::DatabaseError;
use crate::jobs::model::{Job, JobInput};
use crate::jobs::retry::RetryPolicy;
use crate::llm::LlmProvider;
use crate::store::Database;
use crate::workers::{WorkerContext, WorkerRegistry, WorkerResult};

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    /// The worker ran but needs user input; the job is completed with a
    /// clarification result.
    NeedsClarification,
    Retrying,
    Failed,
    /// Stale reset or cancellation took the job away mid-run.
    ClaimLost,
}

/// Per-loop counters, logged on every busy tick and at shutdown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopStats {
    pub claimed: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub lost: u64,
}

impl LoopStats {
    pub fn record(&mut self, outcome: ProcessOutcome) {
        self.claimed += 1;
        match outcome {
            ProcessOutcome::Completed | ProcessOutcome::NeedsClarification => self.completed += 1,
            ProcessOutcome::Retrying => self.retried += 1,
            ProcessOutcome::Failed => self.failed += 1,
            ProcessOutcome::ClaimLost => self.lost += 1,
        }
    }
}

/// Drives claimed jobs through the registered workers.
pub struct JobProcessor {
    db: Arc<dyn Database>,
    llm: Option<Arc<dyn LlmProvider>>,
    registry: Arc<WorkerRegistry>,
    retry: RetryPolicy,
    config: ProcessorConfig,
    /// Distinguishes this process in `claimed_by`.
    instance: String,
}

impl JobProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        llm: Option<Arc<dyn LlmProvider>>,
        registry: Arc<WorkerRegistry>,
        config: ProcessorConfig,
    ) -> Self {
        let instance = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            db,
            llm,
            registry,
            retry: RetryPolicy::from_config(&config),
            config,
            instance,
        }
    }

    pub fn worker_id(&self, worker_type: WorkerType) -> String {
        format!("{worker_type}-{}", self.instance)
    }

    /// Claim and run one job of `worker_type`.
    ///
    /// `Ok(None)` when nothing was claimable.
    pub async fn process_next(
        &self,
        worker_type: WorkerType,
    ) -> Result<Option<ProcessOutcome>, DatabaseError> {
        let worker_id = self.worker_id(worker_type);
        let Some(job) = self.db.claim_next_job(worker_type, &worker_id).await? else {
            trace!(worker_type = %worker_type, "No claimable job");
            return Ok(None);
        };
        debug!(job_id = %job.id, worker_type = %worker_type, intent = %job.intent, "Claimed job");
        self.execute(job, &worker_id).await.map(Some)
    }

    async fn execute(&self, job: Job, worker_id: &str) -> Result<ProcessOutcome, DatabaseError> {
        if !self.db.start_job(job.id, worker_id).await? {
            warn!(job_id = %job.id, "Claim lost before start");
            return Ok(ProcessOutcome::ClaimLost);
        }

        let worker = self.registry.get(job.worker_type);
        if !worker.supported_intents().contains(&job.intent) {
            let message = format!("{} worker does not handle {}", job.worker_type, job.intent);
            if !self.db.fail_job(job.id, worker_id, &message).await? {
                return Ok(ProcessOutcome::ClaimLost);
            }
            error!(job_id = %job.id, intent = %job.intent, worker_type = %job.worker_type, "Job routed to a worker that does not support its intent");
            return Ok(ProcessOutcome::Failed);
        }
        let ctx = WorkerContext::new(Arc::clone(&self.db), self.llm.clone(), worker_id);

        match worker.process(&job, &ctx).await {
            Ok(result) => self.record_success(&job, worker_id, &result).await,
            Err(e) if e.is_transient() && job.can_retry() => {
                let next = self.retry.next_retry_at(job.retry_count, Utc::now());
                if !self
                    .db
                    .schedule_job_retry(job.id, worker_id, &e.to_string(), next)
                    .await?
                {
                    warn!(job_id = %job.id, error = %e, "Claim lost, retry not recorded");
                    return Ok(ProcessOutcome::ClaimLost);
                }
                warn!(
                    job_id = %job.id,
                    attempt = job.retry_count + 1,
                    max_retries = job.max_retries,
                    next_retry_at = %next,
                    error = %e,
                    "Job failed, retry scheduled"
                );
                Ok(ProcessOutcome::Retrying)
            }
            Err(e) => {
                if !self.db.fail_job(job.id, worker_id, &e.to_string()).await? {
                    warn!(job_id = %job.id, error = %e, "Claim lost, failure not recorded");
                    return Ok(ProcessOutcome::ClaimLost);
                }
                error!(job_id = %job.id, retry_count = job.retry_count, error = %e, "Job failed");
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    async fn record_success(
        &self,
        job: &Job,
        worker_id: &str,
        result: &WorkerResult,
    ) -> Result<ProcessOutcome, DatabaseError> {
        let output = serde_json::to_value(result)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        if !self.db.complete_job(job.id, worker_id, &output).await? {
            warn!(job_id = %job.id, "Claim lost, discarding worker result");
            return Ok(ProcessOutcome::ClaimLost);
        }
        if result.needs_clarification {
            info!(job_id = %job.id, missing = ?result.missing_fields, "Job needs clarification");
            self.record_clarification_turn(job, result).await;
            Ok(ProcessOutcome::NeedsClarification)
        } else {
            info!(job_id = %job.id, created = result.created_nodes.len(), "Job completed");
            Ok(ProcessOutcome::Completed)
        }
    }

    /// Append the worker's question to the job's thread so the user's next
    /// message answers it.
    async fn record_clarification_turn(&self, job: &Job, result: &WorkerResult) {
        let Some(thread_id) = job.thread_id else {
            return;
        };
        let input = job.input();
        let turn = NewTurn::new(thread_id, input.user_input.clone(), result.message.clone())
            .with_intent(Some(job.intent))
            .with_context_state(Some(clarification_state(job, &input, result)))
            .with_actions(vec![json!({
                "type": "clarification_requested",
                "job_id": job.id,
                "missing_fields": result.missing_fields,
            })]);
        if let Err(e) = self.db.append_turn(&turn).await {
            warn!(job_id = %job.id, thread_id = %thread_id, error = %e, "Failed to record clarification turn");
        }
    }

    /// Run up to `max` jobs of one worker type; returns how many were claimed.
    pub async fn process_batch(&self, worker_type: WorkerType, max: usize, stats: &mut LoopStats) -> usize {
        let mut processed = 0;
        while processed < max {
            match self.process_next(worker_type).await {
                Ok(Some(outcome)) => {
                    stats.record(outcome);
                    processed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(worker_type = %worker_type, error = %e, "Job processing error");
                    break;
                }
            }
        }
        processed
    }

    /// Drain up to `max_jobs` across all worker types, round-robin.
    pub async fn process_all(&self, max_jobs: usize) -> usize {
        let mut processed = 0;
        let mut stats = LoopStats::default();
        while processed < max_jobs {
            let mut progressed = false;
            for worker_type in WorkerType::ALL {
                if processed >= max_jobs {
                    break;
                }
                if self.process_batch(worker_type, 1, &mut stats).await > 0 {
                    processed += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        info!(processed, ?stats, "Processed jobs on demand");
        processed
    }

    /// Return abandoned claims to `pending`.
    pub async fn sweep_stale(&self) -> Result<usize, DatabaseError> {
        let timeout = chrono::Duration::from_std(self.config.stale_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let count = self.db.reset_stale_jobs(Utc::now() - timeout).await?;
        if count > 0 {
            info!(count, "Reset stale job claims");
        }
        Ok(count)
    }

    /// Spawn one poll loop per worker type and the stale sweeper.
    ///
    /// All tasks stop when `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = WorkerType::ALL
            .into_iter()
            .map(|worker_type| {
                let processor = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { processor.run_loop(worker_type, shutdown).await })
            })
            .collect();

        let processor = Arc::clone(self);
        handles.push(tokio::spawn(async move { processor.run_sweeper(shutdown).await }));
        handles
    }

    async fn run_loop(&self, worker_type: WorkerType, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_type = %worker_type,
            worker_id = %self.worker_id(worker_type),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Job poll loop started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = LoopStats::default();

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let processed = self
                .process_batch(worker_type, self.config.batch_size, &mut stats)
                .await;
            if processed > 0 {
                debug!(worker_type = %worker_type, processed, ?stats, "Poll tick");
            }
        }

        info!(worker_type = %worker_type, ?stats, "Job poll loop stopped");
    }

    async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            if let Err(e) = self.sweep_stale().await {
                warn!(error = %e, "Stale job sweep failed");
            }
        }
        debug!("Stale job sweeper stopped");
    }
}

/// Slot-filling state that resumes `job` once the missing fields arrive.
fn clarification_state(job: &Job, input: &JobInput, result: &WorkerResult) -> ContextState {
    let mut partial: Map<String, Value> = input
        .entities
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    partial.extend(input.partial_data.clone());
    ContextState {
        pending_intent: Some(job.intent),
        partial_data: Some(partial),
        missing_fields: result.missing_fields.clone(),
    }
}
