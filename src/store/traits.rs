//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::intent::WorkerType;
use crate::agent::thread::{NewTurn, Thread, ThreadSummary, TurnRecord};
use crate::error::DatabaseError;
use crate::jobs::model::Job;
use crate::nodes::{ContainerRef, Node, Relation};

/// Backend-agnostic database trait covering threads, jobs and planner nodes.
///
/// Job transitions after the claim are compare-and-swap updates keyed on the
/// job id, the expected status and the claiming worker. They return `false`
/// when the row no longer matches, which means the claim was lost.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Threads ─────────────────────────────────────────────────────

    /// Create the thread if it does not exist and return the stored row.
    ///
    /// An existing thread is returned unchanged, whoever owns it.
    async fn ensure_thread(&self, id: Uuid, user_id: &str) -> Result<Thread, DatabaseError>;

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, DatabaseError>;

    /// Mark an owned thread archived. Returns `false` if missing or not owned.
    async fn archive_thread(&self, id: Uuid, user_id: &str) -> Result<bool, DatabaseError>;

    /// Append a turn, assigning the next `turn_index` atomically.
    async fn append_turn(&self, turn: &NewTurn) -> Result<TurnRecord, DatabaseError>;

    /// Most recent turn of a thread.
    async fn last_turn(&self, thread_id: Uuid) -> Result<Option<TurnRecord>, DatabaseError>;

    /// All turns of a thread in index order.
    async fn list_turns(&self, thread_id: Uuid) -> Result<Vec<TurnRecord>, DatabaseError>;

    /// Threads of a user, newest activity first.
    async fn list_threads(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ThreadSummary>, DatabaseError>;

    /// Delete the turn log of an owned thread.
    ///
    /// Returns `None` if the thread is missing or owned by someone else,
    /// otherwise the number of deleted turns.
    async fn delete_thread_turns(
        &self,
        thread_id: Uuid,
        user_id: &str,
    ) -> Result<Option<usize>, DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// Atomically claim the oldest eligible pending job of `worker_type`.
    ///
    /// `Ok(None)` when nothing is claimable or another worker won the race.
    async fn claim_next_job(
        &self,
        worker_type: WorkerType,
        worker_id: &str,
    ) -> Result<Option<Job>, DatabaseError>;

    /// `claimed → processing`.
    async fn start_job(&self, id: Uuid, worker_id: &str) -> Result<bool, DatabaseError>;

    async fn update_job_progress(
        &self,
        id: Uuid,
        worker_id: &str,
        progress: u8,
    ) -> Result<bool, DatabaseError>;

    /// `processing → completed`.
    async fn complete_job(
        &self,
        id: Uuid,
        worker_id: &str,
        output: &Value,
    ) -> Result<bool, DatabaseError>;

    /// `processing → pending` with `retry_count + 1`, claim cleared and the
    /// job hidden from claims until `next_retry_at`.
    async fn schedule_job_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// `processing → failed`.
    async fn fail_job(&self, id: Uuid, worker_id: &str, error: &str)
    -> Result<bool, DatabaseError>;

    /// User cancellation; only from `pending` or `claimed`.
    async fn cancel_job(&self, id: Uuid, user_id: &str) -> Result<bool, DatabaseError>;

    /// User-initiated `failed → pending`; `retry_count` is left unchanged.
    async fn retry_failed_job(&self, id: Uuid, user_id: &str) -> Result<bool, DatabaseError>;

    /// Return abandoned claims to `pending`. `cutoff` is `now - stale_timeout`.
    async fn reset_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError>;

    // ── Nodes ───────────────────────────────────────────────────────

    async fn insert_node(&self, node: &Node) -> Result<(), DatabaseError>;

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, DatabaseError>;

    /// Nodes written by a job, oldest first.
    async fn list_nodes_for_job(&self, job_id: Uuid) -> Result<Vec<Node>, DatabaseError>;

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<Node>, DatabaseError>;

    /// Non-archived containers of a user, newest first, at most `limit`.
    async fn list_active_containers(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ContainerRef>, DatabaseError>;

    /// Insert a relation. Returns `false` if an identical edge already exists.
    async fn insert_relation(&self, relation: &Relation) -> Result<bool, DatabaseError>;

    /// Outgoing relations of a node.
    async fn list_relations(&self, from_id: Uuid) -> Result<Vec<Relation>, DatabaseError>;
}
