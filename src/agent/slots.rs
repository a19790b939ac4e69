//! Multi-turn slot filling.
//!
//! A negotiation is carried in a [`ContextState`] that the server stores on the
//! latest turn and the client may echo back. Each request either continues a
//! pending negotiation (the input answers the first missing field) or starts
//! fresh from a classification.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::intent::{ClassificationResult, Intent};

/// In-flight slot-filling state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_data: Option<Map<String, Value>>,
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

impl ContextState {
    /// A request continues this state iff an intent is pending and fields are
    /// still missing.
    pub fn is_continuation(&self) -> bool {
        self.pending_intent.is_some() && !self.missing_fields.is_empty()
    }

    fn has_title(&self) -> bool {
        self.partial_data
            .as_ref()
            .and_then(|data| data.get("title"))
            .map(|v| match v {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            })
            .unwrap_or(false)
    }
}

/// An intent with everything needed to enqueue it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyIntent {
    pub intent: Intent,
    pub confidence: f32,
    pub entities: HashMap<String, String>,
    pub partial_data: Map<String, Value>,
}

/// Result of one slot-filling step.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    /// Ask the user for more; `state` becomes the turn's server state.
    NeedsClarification {
        intent: Intent,
        prompt: String,
        state: ContextState,
    },
    /// Enough data to execute.
    Ready(ReadyIntent),
}

/// Client-supplied state wins over the stored one.
pub fn effective_state(
    stored: Option<ContextState>,
    client: Option<ContextState>,
) -> Option<ContextState> {
    client.or(stored)
}

/// Apply `input` as the answer to the first missing field of `state`.
///
/// Callers must check [`ContextState::is_continuation`] first.
pub fn continue_negotiation(mut state: ContextState, input: &str) -> SlotOutcome {
    let intent = state.pending_intent.unwrap_or(Intent::Unknown);
    let mut partial = state.partial_data.take().unwrap_or_default();

    if !state.missing_fields.is_empty() {
        let field = state.missing_fields.remove(0);
        partial.insert(field, Value::String(input.trim().to_string()));
    }
    state.partial_data = Some(partial);

    if !state.missing_fields.is_empty() && !state.has_title() {
        let prompt = format!(
            "Got it. What's the {}?",
            humanize_field(&state.missing_fields[0])
        );
        return SlotOutcome::NeedsClarification {
            intent,
            prompt,
            state,
        };
    }

    let partial_data = state.partial_data.unwrap_or_default();
    let entities = partial_data
        .iter()
        .filter_map(|(k, v)| value_as_text(v).map(|text| (k.clone(), text)))
        .collect();

    SlotOutcome::Ready(ReadyIntent {
        intent,
        confidence: 1.0,
        entities,
        partial_data,
    })
}

/// Start a negotiation from a fresh classification.
pub fn from_classification(result: ClassificationResult) -> SlotOutcome {
    let partial_data: Map<String, Value> = result
        .entities
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    if result.title().is_none() {
        let state = ContextState {
            pending_intent: Some(result.intent),
            partial_data: Some(partial_data),
            missing_fields: vec!["title".to_string()],
        };
        return SlotOutcome::NeedsClarification {
            intent: result.intent,
            prompt: "What would you like to call it?".to_string(),
            state,
        };
    }

    SlotOutcome::Ready(ReadyIntent {
        intent: result.intent,
        confidence: result.confidence,
        entities: result.entities,
        partial_data,
    })
}

fn humanize_field(field: &str) -> String {
    field.replace('_', " ")
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
