//! Calendar worker: one-off time blocks and recurring routines.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use tracing::info;

use crate::agent::intent::{Intent, WorkerType};
use crate::error::WorkerError;
use crate::jobs::model::{Job, JobInput};
use crate::nodes::{Node, NodeType, Recurrence};
use crate::workers::extract::{
    parse_date_entity, parse_day, parse_duration, parse_recurrence, parse_time, truncate_title,
};
use crate::workers::{Worker, WorkerContext, WorkerResult};

/// Length of a block when none is given.
const DEFAULT_DURATION_MINUTES: i64 = 60;

pub struct CalendarWorker;

impl CalendarWorker {
    /// Time from the `time` entity, falling back to the raw input.
    fn time(input: &JobInput) -> Result<Option<NaiveTime>, WorkerError> {
        if let Some(value) = input.field("time")
            && let Some(time) = parse_time(&value).map_err(WorkerError::Permanent)?
        {
            return Ok(Some(time));
        }
        parse_time(&input.user_input).map_err(WorkerError::Permanent)
    }

    fn recurrence(input: &JobInput) -> Option<Recurrence> {
        input
            .field("recurrence")
            .and_then(|v| v.parse::<Recurrence>().ok().or_else(|| parse_recurrence(&v)))
            .or_else(|| parse_recurrence(&input.user_input))
    }

    fn duration(input: &JobInput) -> Duration {
        input
            .field("duration")
            .and_then(|v| {
                v.trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|m| *m > 0)
                    .map(Duration::minutes)
                    .or_else(|| parse_duration(&format!("for {v}")))
            })
            .or_else(|| parse_duration(&input.user_input))
            .unwrap_or_else(|| Duration::minutes(DEFAULT_DURATION_MINUTES))
    }

    /// Explicit date, then a day phrase, then the next occurrence of `time`.
    fn day(input: &JobInput, time: NaiveTime, now: DateTime<Utc>) -> NaiveDate {
        let explicit = input
            .field("date")
            .or_else(|| input.field("day"))
            .and_then(|v| {
                parse_date_entity(&v)
                    .map(|dt| dt.date_naive())
                    .or_else(|| parse_day(&v, now))
            })
            .or_else(|| parse_day(&input.user_input, now));
        if let Some(day) = explicit {
            return day;
        }
        let today = now.date_naive();
        if today.and_time(time).and_utc() > now {
            today
        } else {
            today.succ_opt().unwrap_or(today)
        }
    }
}

#[async_trait]
impl Worker for CalendarWorker {
    fn worker_type(&self) -> WorkerType {
        WorkerType::Calendar
    }

    fn supported_intents(&self) -> &'static [Intent] {
        &[Intent::ScheduleRequest, Intent::Routine]
    }

    async fn process(&self, job: &Job, ctx: &WorkerContext) -> Result<WorkerResult, WorkerError> {
        let existing = ctx.db.list_nodes_for_job(job.id).await?;
        if let Some(node) = existing.first() {
            info!(job_id = %job.id, node_id = %node.id, "Time block already created by an earlier attempt");
            return Ok(WorkerResult::created(
                format!("Scheduled \"{}\"", node.title),
                existing.iter().map(|n| n.id).collect(),
            ));
        }

        let input = job.input();
        let Some(time) = Self::time(&input)? else {
            return Ok(WorkerResult::clarification(
                "What time should I schedule it?",
                &["time"],
            ));
        };

        let recurrence = Self::recurrence(&input);
        if job.intent == Intent::Routine && recurrence.is_none() {
            return Ok(WorkerResult::clarification(
                "How often should it repeat?",
                &["recurrence"],
            ));
        }

        let title = truncate_title(
            &input
                .field("title")
                .unwrap_or_else(|| input.user_input.trim().to_string()),
        );
        if title.is_empty() {
            return Ok(WorkerResult::clarification(
                "What would you like to call it?",
                &["title"],
            ));
        }

        let duration = Self::duration(&input);
        let day = Self::day(&input, time, ctx.now);
        let starts_at = day.and_time(time).and_utc();
        let ends_at = starts_at + duration;
        ctx.report_progress(job, 50).await;

        let node = Node::new(&job.user_id, NodeType::TimeBlock, title.clone())
            .with_schedule(starts_at, ends_at)
            .with_recurrence(recurrence)
            .with_source_job(job.id)
            .with_metadata(json!({
                "intent": job.intent,
                "duration_minutes": duration.num_minutes(),
            }));
        ctx.db.insert_node(&node).await?;

        info!(
            job_id = %job.id,
            node_id = %node.id,
            starts_at = %starts_at,
            recurrence = recurrence.map(|r| r.as_str()).unwrap_or("none"),
            "Created time block"
        );

        let mut message = format!(
            "Scheduled \"{title}\" for {} UTC",
            starts_at.format("%a %b %-d %H:%M")
        );
        if let Some(recurrence) = recurrence {
            message.push_str(&format!(", repeating {}", recurrence.as_str()));
        }
        Ok(WorkerResult::created(message, vec![node.id]))
    }
}
