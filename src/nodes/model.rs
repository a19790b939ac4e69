//! Planner items written by workers: tasks, containers and time blocks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of planner item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Task,
    Container,
    TimeBlock,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Container => "container",
            Self::TimeBlock => "time_block",
        }
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "container" => Ok(Self::Container),
            "time_block" => Ok(Self::TimeBlock),
            other => Err(format!("unknown node type '{other}'")),
        }
    }
}

/// Planner category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Todo,
    Course,
    Club,
    Project,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Course => "course",
            Self::Club => "club",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "course" | "class" => Ok(Self::Course),
            "club" => Ok(Self::Club),
            "project" => Ok(Self::Project),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

/// Repetition of a time block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
    Weekdays,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Weekdays => "weekdays",
        }
    }
}

impl FromStr for Recurrence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "every day" => Ok(Self::Daily),
            "weekly" | "every week" => Ok(Self::Weekly),
            "monthly" | "every month" => Ok(Self::Monthly),
            "weekdays" | "every weekday" => Ok(Self::Weekdays),
            other => Err(format!("unknown recurrence '{other}'")),
        }
    }
}

/// A planner item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub user_id: String,
    pub node_type: NodeType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    /// Job that created this node; used to make retries idempotent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_job_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn new(user_id: impl Into<String>, node_type: NodeType, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            node_type,
            title: title.into(),
            category: None,
            tags: Vec::new(),
            parent_id: None,
            due_at: None,
            starts_at: None,
            ends_at: None,
            recurrence: None,
            source_job_id: None,
            metadata: serde_json::Value::Null,
            archived: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_parent(mut self, parent_id: Option<Uuid>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_due(mut self, due: Option<DateTime<Utc>>) -> Self {
        self.due_at = due;
        self
    }

    pub fn with_schedule(mut self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        self.starts_at = Some(starts_at);
        self.ends_at = Some(ends_at);
        self
    }

    pub fn with_recurrence(mut self, recurrence: Option<Recurrence>) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn with_source_job(mut self, job_id: Uuid) -> Self {
        self.source_job_id = Some(job_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Kind of edge between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    BelongsTo,
    SubtaskOf,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelongsTo => "belongs_to",
            Self::SubtaskOf => "subtask_of",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "subtask_of" => Self::SubtaskOf,
            _ => Self::BelongsTo,
        }
    }
}

/// Directed edge `from_id → to_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    pub user_id: String,
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub kind: RelationKind,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    pub fn new(user_id: impl Into<String>, from_id: Uuid, to_id: Uuid, kind: RelationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            from_id,
            to_id,
            kind,
            created_at: Utc::now(),
        }
    }
}

/// Compact container description used for classification grounding and
/// worker matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: Uuid,
    pub title: String,
    pub category: Category,
}

impl ContainerRef {
    /// `None` for nodes that are not categorized containers.
    pub fn from_node(node: &Node) -> Option<Self> {
        if node.node_type != NodeType::Container {
            return None;
        }
        Some(Self {
            id: node.id,
            title: node.title.clone(),
            category: node.category.unwrap_or(Category::Project),
        })
    }
}
