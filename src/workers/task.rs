//! Task worker: todos, course and club tasks, journal entries.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::intent::{Intent, WorkerType};
use crate::error::WorkerError;
use crate::jobs::model::{Job, JobInput};
use crate::nodes::{Category, ContainerRef, Node, NodeType, Relation, RelationKind};
use crate::workers::extract::{
    end_of_day, hashtags, mentions, normalize_tags, parse_date_entity, parse_day, split_list,
    truncate_title,
};
use crate::workers::{Worker, WorkerContext, WorkerResult};

/// Entity keys that may name the container a task belongs to.
const CONTAINER_KEYS: &[&str] = &["container", "course", "club", "project"];

pub struct TaskWorker;

impl TaskWorker {
    fn category_for(intent: Intent) -> Category {
        match intent {
            Intent::CourseTask => Category::Course,
            Intent::ClubTask => Category::Club,
            _ => Category::Todo,
        }
    }

    fn preferred_container_category(intent: Intent) -> Option<Category> {
        match intent {
            Intent::CourseTask => Some(Category::Course),
            Intent::ClubTask => Some(Category::Club),
            Intent::ProjectTask => Some(Category::Project),
            _ => None,
        }
    }

    /// Resolve the container a task should be filed under.
    ///
    /// An explicit `container_id` wins; then a container named by an entity;
    /// then a container whose title appears in the input. Containers of the
    /// category implied by the intent are preferred.
    async fn resolve_container(
        job: &Job,
        input: &JobInput,
        ctx: &WorkerContext,
    ) -> Result<Option<ContainerRef>, WorkerError> {
        if let Some(id) = input.field("container_id").and_then(|s| Uuid::parse_str(&s).ok()) {
            if let Some(found) = input.container_context.iter().find(|c| c.id == id) {
                return Ok(Some(found.clone()));
            }
            if let Some(node) = ctx.db.get_node(id).await?
                && node.user_id == job.user_id
                && !node.archived
                && let Some(container) = ContainerRef::from_node(&node)
            {
                return Ok(Some(container));
            }
            debug!(job_id = %job.id, container_id = %id, "Ignoring unknown container id");
        }

        let preferred = Self::preferred_container_category(job.intent);
        let mut candidates: Vec<&ContainerRef> = input.container_context.iter().collect();
        candidates.sort_by_key(|c| Some(c.category) != preferred);

        for key in CONTAINER_KEYS {
            if let Some(name) = input.field(key)
                && let Some(found) = candidates
                    .iter()
                    .find(|c| c.title.trim().eq_ignore_ascii_case(name.trim()))
            {
                return Ok(Some((*found).clone()));
            }
        }

        Ok(candidates
            .into_iter()
            .find(|c| mentions(&input.user_input, &c.title))
            .cloned())
    }
}

#[async_trait]
impl Worker for TaskWorker {
    fn worker_type(&self) -> WorkerType {
        WorkerType::Task
    }

    fn supported_intents(&self) -> &'static [Intent] {
        &[
            Intent::QuickTodo,
            Intent::CourseTask,
            Intent::ClubTask,
            Intent::Journal,
            Intent::Unknown,
        ]
    }

    async fn process(&self, job: &Job, ctx: &WorkerContext) -> Result<WorkerResult, WorkerError> {
        let existing = ctx.db.list_nodes_for_job(job.id).await?;
        if let Some(node) = existing.first() {
            if let Some(parent) = node.parent_id {
                ctx.db
                    .insert_relation(&Relation::new(
                        &job.user_id,
                        node.id,
                        parent,
                        RelationKind::BelongsTo,
                    ))
                    .await?;
            }
            info!(job_id = %job.id, node_id = %node.id, "Task already created by an earlier attempt");
            return Ok(WorkerResult::created(
                format!("Added \"{}\"", node.title),
                existing.iter().map(|n| n.id).collect(),
            ));
        }

        let input = job.input();
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

        let category = Self::category_for(job.intent);

        let mut raw_tags: Vec<String> = input
            .field("tags")
            .map(|t| split_list(&t))
            .unwrap_or_default();
        raw_tags.extend(hashtags(&input.user_input));
        if job.intent == Intent::Journal {
            raw_tags.push("journal".to_string());
        }
        let tags = normalize_tags(raw_tags);

        // Journal entries are records, not deadlines.
        let due = if job.intent == Intent::Journal {
            None
        } else {
            input
                .field("due_date")
                .and_then(|v| {
                    parse_date_entity(&v).or_else(|| parse_day(&v, ctx.now).map(end_of_day))
                })
                .or_else(|| parse_day(&input.user_input, ctx.now).map(end_of_day))
        };

        let container = Self::resolve_container(job, &input, ctx).await?;
        ctx.report_progress(job, 50).await;

        let node = Node::new(&job.user_id, NodeType::Task, title.clone())
            .with_category(category)
            .with_tags(tags)
            .with_parent(container.as_ref().map(|c| c.id))
            .with_due(due)
            .with_source_job(job.id)
            .with_metadata(json!({ "intent": job.intent }));
        ctx.db.insert_node(&node).await?;

        if let Some(container) = &container {
            ctx.db
                .insert_relation(&Relation::new(
                    &job.user_id,
                    node.id,
                    container.id,
                    RelationKind::BelongsTo,
                ))
                .await?;
        }

        info!(
            job_id = %job.id,
            node_id = %node.id,
            category = %category,
            container = container.as_ref().map(|c| c.title.as_str()).unwrap_or("-"),
            "Created task"
        );

        let mut message = match job.intent {
            Intent::Journal => format!("Saved journal entry \"{title}\""),
            _ => format!("Added \"{title}\""),
        };
        if let Some(container) = &container {
            message.push_str(&format!(" to {}", container.title));
        }
        if let Some(due) = node.due_at {
            message.push_str(&format!(", due {}", due.format("%a %b %-d")));
        }

        Ok(WorkerResult::created(message, vec![node.id]))
    }
}
