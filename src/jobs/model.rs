//! Durable job records.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::agent::intent::{Intent, WorkerType};
use crate::nodes::ContainerRef;

/// Job lifecycle status.
///
/// ```text
/// pending → claimed → processing → completed
///                     processing → pending   (retry)
///                     processing → failed
/// pending | claimed → cancelled              (user)
/// claimed | processing → pending             (stale reset)
/// failed → pending                           (user retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Claimed,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// User cancellation is allowed before work starts.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Claimed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Payload handed to workers in `input_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub user_input: String,
    #[serde(default)]
    pub entities: HashMap<String, String>,
    #[serde(default)]
    pub partial_data: Map<String, Value>,
    #[serde(default)]
    pub container_context: Vec<ContainerRef>,
}

impl JobInput {
    /// First non-blank value for `key`, preferring slot-filled data over
    /// classifier entities.
    pub fn field(&self, key: &str) -> Option<String> {
        let from_partial = self.partial_data.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        });
        from_partial
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.entities
                    .get(key)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
    }
}

/// A unit of asynchronous agent work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub thread_id: Option<Uuid>,
    pub intent: Intent,
    pub worker_type: WorkerType,
    pub status: JobStatus,
    /// 0–100.
    pub progress: u8,
    pub input_data: Value,
    #[serde(default)]
    pub output_data: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// A fresh `pending` job routed by `intent`.
    pub fn new(
        user_id: impl Into<String>,
        thread_id: Option<Uuid>,
        intent: Intent,
        input: &JobInput,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            thread_id,
            intent,
            worker_type: intent.worker_type(),
            status: JobStatus::Pending,
            progress: 0,
            input_data: serde_json::to_value(input).unwrap_or(Value::Null),
            output_data: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            claimed_by: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            next_retry_at: None,
            created_at: Utc::now(),
        }
    }

    /// Decode `input_data`; malformed payloads decode to an empty input.
    pub fn input(&self) -> JobInput {
        serde_json::from_value(self.input_data.clone()).unwrap_or_default()
    }

    /// Whether another automatic retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
