//! Synchronous entry point for user requests.
//!
//! Validates the request, resolves the thread, runs slot filling (or a fresh
//! classification) and either asks for more information or enqueues a job.
//! Every request that passes validation leaves a turn in the thread log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::classifier::IntentClassifier;
use crate::agent::intent::{Intent, WorkerType};
use crate::agent::slots::{self, ContextState, ReadyIntent, SlotOutcome};
use crate::agent::thread::NewTurn;
use crate::config::OrchestratorConfig;
use crate::error::{DatabaseError, InteractError};
use crate::jobs::model::{Job, JobInput};
use crate::llm::LlmProvider;
use crate::nodes::ContainerRef;
use crate::store::Database;

/// Shown when anything after validation fails.
pub const GENERIC_ERROR_MESSAGE: &str =
    "Sorry, something went wrong while handling that. Please try again.";

/// Containers offered to the classifier and workers.
const MAX_CONTEXT_CONTAINERS: i64 = 20;

/// Body of `POST /agent/interact`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractRequest {
    pub input: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub client_state: Option<ContextState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractStatus {
    /// Finished synchronously. Reserved; every executable request is
    /// currently handed to a job.
    Success,
    Processing,
    ClarificationNeeded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractResponse {
    pub thread_id: Uuid,
    pub status: InteractStatus,
    pub display_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_state: Option<ContextState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_nodes: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InteractResponse {
    fn error(thread_id: Uuid, error: &DatabaseError) -> Self {
        Self {
            thread_id,
            status: InteractStatus::Error,
            display_message: GENERIC_ERROR_MESSAGE.to_string(),
            server_state: None,
            created_nodes: Vec::new(),
            job_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// Request validated and bound to a thread.
struct Validated<'a> {
    input: &'a str,
    thread_id: Uuid,
    /// Whether the caller named an existing conversation.
    resumed: bool,
}

/// Result of the work after validation, before the turn is logged.
struct Handled {
    response: InteractResponse,
    intent: Option<Intent>,
    state: Option<ContextState>,
    actions: Vec<serde_json::Value>,
}

pub struct Orchestrator {
    db: Arc<dyn Database>,
    classifier: IntentClassifier,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(db: Arc<dyn Database>, llm: Arc<dyn LlmProvider>, config: OrchestratorConfig) -> Self {
        let classifier = IntentClassifier::new(llm, config.classifier_timeout);
        Self {
            db,
            classifier,
            config,
        }
    }

    /// Handle one user request.
    ///
    /// `Err` only for validation failures; everything else is reported in the
    /// response (`status = ERROR`).
    pub async fn interact(
        &self,
        user_id: &str,
        request: InteractRequest,
    ) -> Result<InteractResponse, InteractError> {
        let InteractRequest {
            input,
            thread_id,
            client_state,
        } = request;
        let validated = self.validate(&input, thread_id.as_deref())?;
        let thread_id = validated.thread_id;

        match self.db.ensure_thread(thread_id, user_id).await {
            Ok(thread) if thread.user_id != user_id => {
                return Err(InteractError::ThreadNotFound(thread_id));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "Failed to resolve thread");
                return Ok(InteractResponse::error(thread_id, &e));
            }
        }

        let handled = match self.handle(user_id, &validated, client_state).await {
            Ok(handled) => handled,
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "Interaction failed");
                let response = InteractResponse::error(thread_id, &e);
                Handled {
                    actions: vec![json!({ "type": "error", "message": e.to_string() })],
                    response,
                    intent: None,
                    state: None,
                }
            }
        };

        let turn = NewTurn::new(thread_id, validated.input, &handled.response.display_message)
            .with_intent(handled.intent)
            .with_context_state(handled.state)
            .with_actions(handled.actions);
        if let Err(e) = self.db.append_turn(&turn).await {
            warn!(thread_id = %thread_id, error = %e, "Failed to log turn");
        }

        Ok(handled.response)
    }

    fn validate<'a>(
        &self,
        input: &'a str,
        thread_id: Option<&str>,
    ) -> Result<Validated<'a>, InteractError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(InteractError::EmptyInput);
        }
        let length = input.chars().count();
        if length > self.config.max_input_chars {
            return Err(InteractError::InputTooLong {
                length,
                max: self.config.max_input_chars,
            });
        }

        let supplied = thread_id.map(str::trim).filter(|s| !s.is_empty());
        let (thread_id, resumed) = match supplied {
            Some(raw) => (
                Uuid::parse_str(raw).map_err(|_| InteractError::InvalidThreadId(raw.to_string()))?,
                true,
            ),
            None => (Uuid::new_v4(), false),
        };

        Ok(Validated {
            input,
            thread_id,
            resumed,
        })
    }

    async fn handle(
        &self,
        user_id: &str,
        request: &Validated<'_>,
        client_state: Option<ContextState>,
    ) -> Result<Handled, DatabaseError> {
        let previous = if request.resumed {
            self.db.last_turn(request.thread_id).await?
        } else {
            None
        };
        let stored = previous.as_ref().and_then(|t| t.context_state.clone());
        let state = slots::effective_state(stored, client_state).filter(ContextState::is_continuation);

        let containers = match self
            .db
            .list_active_containers(user_id, MAX_CONTEXT_CONTAINERS)
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Could not load containers, classifying without them");
                Vec::new()
            }
        };

        let mut degraded = false;
        let (outcome, job_text) = match state {
            Some(state) => {
                // Workers see the original request together with the answer.
                let text = match &previous {
                    Some(turn) => format!("{}\n{}", turn.user_input, request.input),
                    None => request.input.to_string(),
                };
                (slots::continue_negotiation(state, request.input), text)
            }
            None => {
                let result = self.classifier.classify(request.input, &containers).await;
                if result.is_degraded() {
                    warn!(thread_id = %request.thread_id, "Classification degraded, falling back to clarification");
                    degraded = true;
                }
                (slots::from_classification(result), request.input.to_string())
            }
        };

        match outcome {
            SlotOutcome::NeedsClarification {
                intent,
                prompt,
                state,
            } => {
                info!(thread_id = %request.thread_id, intent = %intent, missing = ?state.missing_fields, "Asking for clarification");
                Ok(Handled {
                    response: InteractResponse {
                        thread_id: request.thread_id,
                        status: InteractStatus::ClarificationNeeded,
                        display_message: prompt,
                        server_state: Some(state.clone()),
                        created_nodes: Vec::new(),
                        job_id: None,
                        error: None,
                    },
                    intent: Some(intent),
                    state: Some(state),
                    actions: if degraded {
                        vec![json!({ "type": "classification_degraded" })]
                    } else {
                        Vec::new()
                    },
                })
            }
            SlotOutcome::Ready(ready) => {
                self.enqueue(user_id, request.thread_id, ready, job_text, containers)
                    .await
            }
        }
    }

    async fn enqueue(
        &self,
        user_id: &str,
        thread_id: Uuid,
        ready: ReadyIntent,
        user_input: String,
        containers: Vec<ContainerRef>,
    ) -> Result<Handled, DatabaseError> {
        let display_message = processing_message(&ready);
        let intent = ready.intent;
        let input = JobInput {
            user_input,
            entities: ready.entities,
            partial_data: ready.partial_data,
            container_context: containers,
        };
        let job = Job::new(user_id, Some(thread_id), intent, &input, self.config.max_retries);
        self.db.insert_job(&job).await?;
        info!(
            job_id = %job.id,
            thread_id = %thread_id,
            intent = %intent,
            worker_type = %job.worker_type,
            confidence = ready.confidence,
            "Enqueued job"
        );

        Ok(Handled {
            response: InteractResponse {
                thread_id,
                status: InteractStatus::Processing,
                display_message,
                server_state: None,
                created_nodes: Vec::new(),
                job_id: Some(job.id),
                error: None,
            },
            intent: Some(intent),
            state: None,
            actions: vec![json!({
                "type": "job_enqueued",
                "job_id": job.id,
                "worker_type": job.worker_type,
            })],
        })
    }
}

fn processing_message(ready: &ReadyIntent) -> String {
    let subject = ready
        .entities
        .get("title")
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .unwrap_or_else(|| "that".to_string());
    match ready.intent.worker_type() {
        WorkerType::Calendar => format!("On it! Scheduling {subject}."),
        WorkerType::Project => format!("On it! Setting up {subject}."),
        WorkerType::Task if ready.intent == Intent::Journal => {
            format!("On it! Saving {subject} to your journal.")
        }
        WorkerType::Task => format!("On it! Adding {subject} to your planner."),
    }
}
