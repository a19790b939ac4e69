//! Domain workers that execute claimed jobs.
//!
//! Dispatch is a closed lookup on [`WorkerType`]; every worker is idempotent
//! across retries because it looks up nodes already written for the job
//! (`source_job_id`) before creating new ones.

pub mod calendar;
pub mod extract;
pub mod project;
pub mod task;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::agent::intent::{Intent, WorkerType};
use crate::error::WorkerError;
use crate::jobs::model::Job;
use crate::llm::LlmProvider;
use crate::store::Database;

pub use calendar::CalendarWorker;
pub use project::ProjectWorker;
pub use task::TaskWorker;

/// Outcome of a worker run, stored as the job's `output_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_nodes: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated_nodes: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_clarification: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResult {
    pub fn created(message: impl Into<String>, nodes: Vec<Uuid>) -> Self {
        Self {
            success: true,
            message: message.into(),
            created_nodes: nodes,
            ..Default::default()
        }
    }

    /// The job ran but lacks data only the user can supply.
    pub fn clarification(message: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            success: false,
            message: message.into(),
            needs_clarification: true,
            missing_fields: fields.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Per-call execution context.
#[derive(Clone)]
pub struct WorkerContext {
    pub db: Arc<dyn Database>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub worker_id: String,
    /// Reference instant for relative dates (`tomorrow`, `friday`).
    pub now: DateTime<Utc>,
}

impl WorkerContext {
    pub fn new(
        db: Arc<dyn Database>,
        llm: Option<Arc<dyn LlmProvider>>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            llm,
            worker_id: worker_id.into(),
            now: Utc::now(),
        }
    }

    /// Best-effort progress update; a lost claim is noticed later on the
    /// terminal transition.
    pub async fn report_progress(&self, job: &Job, progress: u8) {
        match self
            .db
            .update_job_progress(job.id, &self.worker_id, progress)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %job.id, "Progress update skipped, claim no longer held"),
            Err(e) => debug!(job_id = %job.id, error = %e, "Progress update failed"),
        }
    }
}

/// A worker executes jobs of one [`WorkerType`].
#[async_trait]
pub trait Worker: Send + Sync {
    fn worker_type(&self) -> WorkerType;

    fn supported_intents(&self) -> &'static [Intent];

    /// Run the job. `Transient` errors are retried with backoff.
    async fn process(&self, job: &Job, ctx: &WorkerContext) -> Result<WorkerResult, WorkerError>;
}

/// Fixed table of one worker per [`WorkerType`].
pub struct WorkerRegistry {
    task: Arc<dyn Worker>,
    calendar: Arc<dyn Worker>,
    project: Arc<dyn Worker>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            task: Arc::new(TaskWorker),
            calendar: Arc::new(CalendarWorker),
            project: Arc::new(ProjectWorker),
        }
    }

    /// Replace the worker registered for `worker.worker_type()`.
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        match worker.worker_type() {
            WorkerType::Task => self.task = worker,
            WorkerType::Calendar => self.calendar = worker,
            WorkerType::Project => self.project = worker,
        }
        self
    }

    pub fn get(&self, worker_type: WorkerType) -> Arc<dyn Worker> {
        match worker_type {
            WorkerType::Task => Arc::clone(&self.task),
            WorkerType::Calendar => Arc::clone(&self.calendar),
            WorkerType::Project => Arc::clone(&self.project),
        }
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
