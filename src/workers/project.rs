//! Project worker: creates containers and optional subtask breakdowns.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::agent::intent::{Intent, WorkerType};
use crate::error::WorkerError;
use crate::jobs::model::{Job, JobInput};
use crate::llm::{ChatMessage, ChatOptions, LlmProvider, extract_json_array};
use crate::nodes::{Category, Node, NodeType, Relation, RelationKind};
use crate::workers::extract::{split_list, truncate_title};
use crate::workers::{Worker, WorkerContext, WorkerResult};

/// Upper bound on generated subtasks.
pub const MAX_SUBTASKS: usize = 10;

/// Used when neither the request nor the model provides steps.
const TEMPLATE_SUBTASKS: [&str; 5] = [
    "Define goals and scope",
    "Research and gather materials",
    "Draft a plan with milestones",
    "Do the main work",
    "Review and wrap up",
];

const SUBTASK_PROMPT: &str = "You break projects into concrete next steps. \
Reply with a JSON array of 3 to 8 short task titles and nothing else.";

static BREAKDOWN_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(break\s*(it\s+)?down|breakdown|subtasks?|steps)\b")
        .expect("valid breakdown regex")
});

pub struct ProjectWorker;

impl ProjectWorker {
    fn category(input: &JobInput) -> Category {
        match input.field("category").and_then(|c| c.parse::<Category>().ok()) {
            Some(c @ (Category::Course | Category::Club | Category::Project)) => c,
            _ => Category::Project,
        }
    }

    fn wants_breakdown(input: &JobInput) -> bool {
        input
            .field("breakdown")
            .is_some_and(|v| v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
            || input.field("subtasks").is_some()
            || BREAKDOWN_WORDS.is_match(&input.user_input)
    }

    /// Subtask titles: explicit list, then the model, then the template.
    async fn plan_subtasks(
        job: &Job,
        input: &JobInput,
        title: &str,
        llm: Option<&dyn LlmProvider>,
    ) -> Result<Vec<String>, WorkerError> {
        let mut titles = input
            .field("subtasks")
            .map(|s| split_list(&s))
            .unwrap_or_default();

        if titles.is_empty()
            && let Some(llm) = llm
        {
            titles = Self::ask_model(llm, title, &input.user_input).await?;
            if titles.is_empty() {
                warn!(job_id = %job.id, "Model returned no usable subtasks, using template");
            }
        }

        if titles.is_empty() {
            titles = TEMPLATE_SUBTASKS.iter().map(|s| s.to_string()).collect();
        }

        let mut out: Vec<String> = Vec::new();
        for t in titles.iter().map(|t| truncate_title(t)) {
            if !t.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(&t)) {
                out.push(t);
            }
        }
        out.truncate(MAX_SUBTASKS);
        Ok(out)
    }

    async fn ask_model(
        llm: &dyn LlmProvider,
        title: &str,
        request: &str,
    ) -> Result<Vec<String>, WorkerError> {
        let response = llm
            .chat(
                vec![
                    ChatMessage::system(SUBTASK_PROMPT),
                    ChatMessage::user(format!("Project: {title}\nRequest: {request}")),
                ],
                ChatOptions::default(),
            )
            .await?;

        let Some(array) = extract_json_array(response.content()) else {
            return Ok(Vec::new());
        };
        let parsed: Vec<Value> = serde_json::from_str(array).unwrap_or_default();
        Ok(parsed
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Object(map) => map
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect())
    }

    fn planned_subtasks(container: &Node) -> Vec<String> {
        container
            .metadata
            .get("subtasks")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Worker for ProjectWorker {
    fn worker_type(&self) -> WorkerType {
        WorkerType::Project
    }

    fn supported_intents(&self) -> &'static [Intent] {
        &[Intent::ProjectTask, Intent::CreateContainer]
    }

    async fn process(&self, job: &Job, ctx: &WorkerContext) -> Result<WorkerResult, WorkerError> {
        let input = job.input();
        let existing = ctx.db.list_nodes_for_job(job.id).await?;

        // The subtask plan is stored on the container, so a retry after a
        // partial write finishes the same plan instead of asking again.
        let (container, reused) = match existing
            .iter()
            .find(|n| n.node_type == NodeType::Container)
        {
            Some(container) => {
                info!(job_id = %job.id, node_id = %container.id, "Reusing container from an earlier attempt");
                (container.clone(), true)
            }
            None => {
                let title = truncate_title(
                    &input
                        .field("title")
                        .or_else(|| input.field("name"))
                        .unwrap_or_else(|| input.user_input.trim().to_string()),
                );
                if title.is_empty() {
                    return Ok(WorkerResult::clarification(
                        "What should the project be called?",
                        &["title"],
                    ));
                }

                let subtasks = if Self::wants_breakdown(&input) {
                    Self::plan_subtasks(job, &input, &title, ctx.llm.as_deref()).await?
                } else {
                    Vec::new()
                };

                let category = Self::category(&input);
                let container = Node::new(&job.user_id, NodeType::Container, title)
                    .with_category(category)
                    .with_source_job(job.id)
                    .with_metadata(json!({ "intent": job.intent, "subtasks": subtasks }));
                ctx.db.insert_node(&container).await?;
                info!(job_id = %job.id, node_id = %container.id, category = %category, "Created container");
                (container, false)
            }
        };
        ctx.report_progress(job, 40).await;

        let planned = Self::planned_subtasks(&container);
        let mut children: Vec<Node> = existing
            .iter()
            .filter(|n| n.parent_id == Some(container.id))
            .cloned()
            .collect();

        for title in &planned {
            let child = match children.iter().find(|c| &c.title == title) {
                Some(child) => child.clone(),
                None => {
                    let child = Node::new(&job.user_id, NodeType::Task, title.clone())
                        .with_category(container.category.unwrap_or(Category::Project))
                        .with_parent(Some(container.id))
                        .with_source_job(job.id);
                    ctx.db.insert_node(&child).await?;
                    children.push(child.clone());
                    child
                }
            };
            ctx.db
                .insert_relation(&Relation::new(
                    &job.user_id,
                    child.id,
                    container.id,
                    RelationKind::SubtaskOf,
                ))
                .await?;
        }

        let mut created = vec![container.id];
        created.extend(children.iter().map(|c| c.id));

        let mut message = if reused {
            format!("Set up \"{}\"", container.title)
        } else {
            format!("Created \"{}\"", container.title)
        };
        if !children.is_empty() {
            message.push_str(&format!(" with {} subtasks", children.len()));
        }
        Ok(WorkerResult::created(message, created))
    }
}
