//! Conversation threads and their append-only turn log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::intent::Intent;
use crate::agent::slots::ContextState;

/// Thread lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Archived,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "archived" => Self::Archived,
            _ => Self::Active,
        }
    }
}

/// Identity of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub user_id: String,
    pub status: ThreadStatus,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
}

/// One request/response pair. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: Uuid,
    pub thread_id: Uuid,
    /// Assigned by the store at insert; strictly increasing per thread.
    pub turn_index: i64,
    pub user_input: String,
    pub ai_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_state: Option<ContextState>,
    #[serde(default)]
    pub actions_executed: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A turn about to be appended.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub thread_id: Uuid,
    pub user_input: String,
    pub ai_response: String,
    pub intent: Option<Intent>,
    pub context_state: Option<ContextState>,
    pub actions_executed: Vec<serde_json::Value>,
}

impl NewTurn {
    pub fn new(thread_id: Uuid, user_input: impl Into<String>, ai_response: impl Into<String>) -> Self {
        Self {
            thread_id,
            user_input: user_input.into(),
            ai_response: ai_response.into(),
            intent: None,
            context_state: None,
            actions_executed: Vec::new(),
        }
    }

    pub fn with_intent(mut self, intent: Option<Intent>) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_context_state(mut self, state: Option<ContextState>) -> Self {
        self.context_state = state;
        self
    }

    pub fn with_actions(mut self, actions: Vec<serde_json::Value>) -> Self {
        self.actions_executed = actions;
        self
    }
}

/// Aggregated view used by `GET /agent/threads`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: Uuid,
    pub last_message: Option<String>,
    pub turn_count: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_status_parse_defaults_to_active() {
        assert_eq!(ThreadStatus::parse("archived"), ThreadStatus::Archived);
        assert_eq!(ThreadStatus::parse("garbage"), ThreadStatus::Active);
    }

    #[test]
    fn summary_serializes_camel_case() {
        let summary = ThreadSummary {
            thread_id: Uuid::new_v4(),
            last_message: Some("hi".into()),
            turn_count: 3,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"threadId\""));
        assert!(json.contains("\"lastMessage\""));
        assert!(json.contains("\"turnCount\":3"));
    }
}
