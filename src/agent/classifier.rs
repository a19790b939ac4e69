//! Intent classification through the language model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::intent::{ClassificationResult, Intent};
use crate::llm::{ChatMessage, ChatOptions, LlmProvider, extract_json_object};
use crate::nodes::ContainerRef;

/// Inputs longer than this are truncated before classification.
pub const MAX_CLASSIFY_CHARS: usize = 2000;

/// At most this many containers are listed in the grounding summary.
const MAX_CONTAINERS_IN_PROMPT: usize = 20;

const SYSTEM_PROMPT: &str = r#"You classify requests for a student planner.
Reply with ONE JSON object and nothing else:
{"intent": "<INTENT>", "confidence": <0..1>, "entities": {"<name>": "<string>"}}

INTENT is one of:
- COURSE_TASK: homework, readings or exams for a course
- PROJECT_TASK: work that belongs to a multi-step project
- CLUB_TASK: something to do for a club or society
- QUICK_TODO: a small standalone todo
- JOURNAL: a diary or reflection entry
- CREATE_CONTAINER: create a new course, club or project
- SCHEDULE_REQUEST: block time on the calendar at a specific time
- ROUTINE: a recurring habit or schedule
- UNKNOWN: none of the above

Useful entities: title, course, club, project, container_id, due_date,
time, recurrence, duration, tags, category, subtasks, breakdown.
Prefer containers from the active list when the request mentions them and
copy their id into container_id. All entity values must be strings."#;

/// Turns raw text into an intent with extracted entities.
pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Classify `input`. Never fails: service errors, timeouts and
    /// unparsable output degrade to [`ClassificationResult::fallback`].
    pub async fn classify(&self, input: &str, containers: &[ContainerRef]) -> ClassificationResult {
        let text = truncate_chars(input, MAX_CLASSIFY_CHARS);
        let mut prompt = String::new();
        let summary = summarize_containers(containers);
        if !summary.is_empty() {
            prompt.push_str("Active containers (id | title | category):\n");
            prompt.push_str(&summary);
            prompt.push_str("\n\n");
        }
        prompt.push_str("Request: ");
        prompt.push_str(text);

        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let call = self.llm.chat(messages, ChatOptions::json());

        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Classification degraded: model call failed");
                return ClassificationResult::fallback();
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Classification degraded: model timed out");
                return ClassificationResult::fallback();
            }
        };

        match parse_classification(response.content()) {
            Some(result) => {
                debug!(intent = %result.intent, confidence = result.confidence, "Classified request");
                result
            }
            None => {
                warn!(
                    output = %truncate_chars(response.content(), 200),
                    "Classification degraded: unparsable model output"
                );
                ClassificationResult::fallback()
            }
        }
    }
}

/// Parse the first JSON object in `output` into a classification.
pub fn parse_classification(output: &str) -> Option<ClassificationResult> {
    let json = extract_json_object(output)?;
    let value: Value = serde_json::from_str(json).ok()?;
    let object = value.as_object()?;

    let intent = object
        .get("intent")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Intent>().ok())
        .unwrap_or(Intent::Unknown);

    let confidence = object
        .get("confidence")
        .and_then(|c| match c {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .map(|c| c.clamp(0.0, 1.0) as f32)
        .unwrap_or(0.0);

    let mut entities = HashMap::new();
    if let Some(Value::Object(map)) = object.get("entities") {
        for (key, value) in map {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s.trim().to_string(),
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            };
            entities.insert(key.clone(), text);
        }
    }

    Some(ClassificationResult {
        intent,
        confidence,
        entities,
    })
}

/// One line per container: `id | title | category`.
pub fn summarize_containers(containers: &[ContainerRef]) -> String {
    containers
        .iter()
        .take(MAX_CONTAINERS_IN_PROMPT)
        .map(|c| format!("- {} | {} | {}", c.id, c.title, c.category))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
