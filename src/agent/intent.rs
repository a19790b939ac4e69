//! Intent taxonomy and the fixed intent → worker routing table.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed classification of a user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    CourseTask,
    ProjectTask,
    ClubTask,
    QuickTodo,
    Journal,
    CreateContainer,
    ScheduleRequest,
    Routine,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 9] = [
        Intent::CourseTask,
        Intent::ProjectTask,
        Intent::ClubTask,
        Intent::QuickTodo,
        Intent::Journal,
        Intent::CreateContainer,
        Intent::ScheduleRequest,
        Intent::Routine,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CourseTask => "COURSE_TASK",
            Self::ProjectTask => "PROJECT_TASK",
            Self::ClubTask => "CLUB_TASK",
            Self::QuickTodo => "QUICK_TODO",
            Self::Journal => "JOURNAL",
            Self::CreateContainer => "CREATE_CONTAINER",
            Self::ScheduleRequest => "SCHEDULE_REQUEST",
            Self::Routine => "ROUTINE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Worker pool responsible for this intent.
    pub fn worker_type(&self) -> WorkerType {
        match self {
            Self::ScheduleRequest | Self::Routine => WorkerType::Calendar,
            Self::QuickTodo | Self::CourseTask | Self::ClubTask | Self::Journal => WorkerType::Task,
            Self::ProjectTask | Self::CreateContainer => WorkerType::Project,
            Self::Unknown => WorkerType::Task,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Intent::ALL
            .into_iter()
            .find(|intent| intent.as_str() == normalized)
            .ok_or_else(|| format!("unknown intent '{s}'"))
    }
}

/// Kind of worker that executes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    Task,
    Calendar,
    Project,
}

impl WorkerType {
    pub const ALL: [WorkerType; 3] = [WorkerType::Task, WorkerType::Calendar, WorkerType::Project];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Calendar => "calendar",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "calendar" => Ok(Self::Calendar),
            "project" => Ok(Self::Project),
            other => Err(format!("unknown worker type '{other}'")),
        }
    }
}

/// Output of the intent classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: Intent,
    /// In `[0, 1]`.
    pub confidence: f32,
    #[serde(default)]
    pub entities: HashMap<String, String>,
}

impl ClassificationResult {
    /// Degraded result used when the model is unavailable or its output is
    /// unusable.
    pub fn fallback() -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            entities: HashMap::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.confidence == 0.0 && self.intent == Intent::Unknown
    }

    /// The non-empty, trimmed `title` entity.
    pub fn title(&self) -> Option<&str> {
        self.entities
            .get("title")
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
    }
}
