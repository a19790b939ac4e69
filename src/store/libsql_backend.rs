//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::intent::{Intent, WorkerType};
use crate::agent::slots::ContextState;
use crate::agent::thread::{NewTurn, Thread, ThreadStatus, ThreadSummary, TurnRecord};
use crate::error::DatabaseError;
use crate::jobs::model::{Job, JobStatus};
use crate::nodes::{Category, ContainerRef, Node, NodeType, Recurrence, Relation, RelationKind};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_jobs_one(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| query_error(op, e))?;
        match rows.next().await.map_err(|e| query_error(op, e))? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn query_nodes(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Node>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| query_error(op, e))?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| query_error(op, e))? {
            nodes.push(row_to_node(&row)?);
        }
        Ok(nodes)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: fixed-width RFC 3339 UTC with microseconds, so
/// string comparison in SQL orders by time.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp '{s}': {e}")))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.as_deref().map(parse_datetime).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid '{s}': {e}")))
}

fn parse_optional_uuid(s: Option<String>) -> Result<Option<Uuid>, DatabaseError> {
    s.as_deref().map(parse_uuid).transpose()
}

/// Convert `Option<String>` to libsql Value.
fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_ts(dt: Option<DateTime<Utc>>) -> libsql::Value {
    opt_text(dt.map(ts))
}

fn to_json(value: &impl serde::Serialize) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Constraint failures are reported separately so workers can treat them as
/// permanent.
fn query_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.to_ascii_lowercase().contains("constraint") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

fn row_error(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("row parse: {e}"))
}

const THREAD_COLUMNS: &str = "id, user_id, status, message_count, created_at";

const TURN_COLUMNS: &str = "id, thread_id, turn_index, user_input, ai_response, intent, context_state, actions_executed, created_at";

const JOB_COLUMNS: &str = "id, user_id, thread_id, intent, worker_type, status, progress, input_data, output_data, error_message, retry_count, max_retries, claimed_by, claimed_at, started_at, completed_at, next_retry_at, created_at";

const NODE_COLUMNS: &str = "id, user_id, node_type, title, category, tags, parent_id, due_at, starts_at, ends_at, recurrence, source_job_id, metadata, archived, created_at";

const RELATION_COLUMNS: &str = "id, user_id, from_id, to_id, kind, created_at";

fn row_to_thread(row: &libsql::Row) -> Result<Thread, DatabaseError> {
    let id: String = row.get(0).map_err(row_error)?;
    let status: String = row.get(2).map_err(row_error)?;
    let created: String = row.get(4).map_err(row_error)?;
    Ok(Thread {
        id: parse_uuid(&id)?,
        user_id: row.get(1).map_err(row_error)?,
        status: ThreadStatus::parse(&status),
        message_count: row.get(3).map_err(row_error)?,
        created_at: parse_datetime(&created)?,
    })
}

fn row_to_turn(row: &libsql::Row) -> Result<TurnRecord, DatabaseError> {
    let id: String = row.get(0).map_err(row_error)?;
    let thread_id: String = row.get(1).map_err(row_error)?;
    let intent: Option<String> = row.get(5).ok();
    let context_state: Option<String> = row.get(6).ok();
    let actions: String = row.get(7).map_err(row_error)?;
    let created: String = row.get(8).map_err(row_error)?;

    // Unreadable snapshots degrade to "no pending negotiation".
    let context_state = context_state.and_then(|s| serde_json::from_str::<ContextState>(&s).ok());

    Ok(TurnRecord {
        id: parse_uuid(&id)?,
        thread_id: parse_uuid(&thread_id)?,
        turn_index: row.get(2).map_err(row_error)?,
        user_input: row.get(3).map_err(row_error)?,
        ai_response: row.get(4).map_err(row_error)?,
        intent: intent.and_then(|s| s.parse::<Intent>().ok()),
        context_state,
        actions_executed: serde_json::from_str(&actions).unwrap_or_default(),
        created_at: parse_datetime(&created)?,
    })
}

fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    let id: String = row.get(0).map_err(row_error)?;
    let thread_id: Option<String> = row.get(2).ok();
    let intent: String = row.get(3).map_err(row_error)?;
    let worker_type: String = row.get(4).map_err(row_error)?;
    let status: String = row.get(5).map_err(row_error)?;
    let progress: i64 = row.get(6).map_err(row_error)?;
    let input_data: String = row.get(7).map_err(row_error)?;
    let output_data: Option<String> = row.get(8).ok();
    let retry_count: i64 = row.get(10).map_err(row_error)?;
    let max_retries: i64 = row.get(11).map_err(row_error)?;
    let created: String = row.get(17).map_err(row_error)?;

    Ok(Job {
        id: parse_uuid(&id)?,
        user_id: row.get(1).map_err(row_error)?,
        thread_id: parse_optional_uuid(thread_id)?,
        intent: intent.parse().map_err(DatabaseError::Serialization)?,
        worker_type: worker_type
            .parse::<WorkerType>()
            .map_err(DatabaseError::Serialization)?,
        status: status.parse::<JobStatus>().map_err(DatabaseError::Serialization)?,
        progress: progress.clamp(0, 100) as u8,
        input_data: serde_json::from_str(&input_data)
            .map_err(|e| DatabaseError::Serialization(format!("input_data: {e}")))?,
        output_data: output_data.and_then(|s| serde_json::from_str(&s).ok()),
        error_message: row.get(9).ok(),
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        claimed_by: row.get(12).ok(),
        claimed_at: parse_optional_datetime(row.get(13).ok())?,
        started_at: parse_optional_datetime(row.get(14).ok())?,
        completed_at: parse_optional_datetime(row.get(15).ok())?,
        next_retry_at: parse_optional_datetime(row.get(16).ok())?,
        created_at: parse_datetime(&created)?,
    })
}

fn row_to_node(row: &libsql::Row) -> Result<Node, DatabaseError> {
    let id: String = row.get(0).map_err(row_error)?;
    let node_type: String = row.get(2).map_err(row_error)?;
    let category: Option<String> = row.get(4).ok();
    let tags: String = row.get(5).map_err(row_error)?;
    let recurrence: Option<String> = row.get(10).ok();
    let metadata: String = row.get(12).map_err(row_error)?;
    let archived: i64 = row.get(13).map_err(row_error)?;
    let created: String = row.get(14).map_err(row_error)?;

    Ok(Node {
        id: parse_uuid(&id)?,
        user_id: row.get(1).map_err(row_error)?,
        node_type: node_type
            .parse::<NodeType>()
            .map_err(DatabaseError::Serialization)?,
        title: row.get(3).map_err(row_error)?,
        category: category.and_then(|c| c.parse::<Category>().ok()),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        parent_id: parse_optional_uuid(row.get(6).ok())?,
        due_at: parse_optional_datetime(row.get(7).ok())?,
        starts_at: parse_optional_datetime(row.get(8).ok())?,
        ends_at: parse_optional_datetime(row.get(9).ok())?,
        recurrence: recurrence.and_then(|r| r.parse::<Recurrence>().ok()),
        source_job_id: parse_optional_uuid(row.get(11).ok())?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        archived: archived != 0,
        created_at: parse_datetime(&created)?,
    })
}

fn row_to_relation(row: &libsql::Row) -> Result<Relation, DatabaseError> {
    let id: String = row.get(0).map_err(row_error)?;
    let from_id: String = row.get(2).map_err(row_error)?;
    let to_id: String = row.get(3).map_err(row_error)?;
    let kind: String = row.get(4).map_err(row_error)?;
    let created: String = row.get(5).map_err(row_error)?;
    Ok(Relation {
        id: parse_uuid(&id)?,
        user_id: row.get(1).map_err(row_error)?,
        from_id: parse_uuid(&from_id)?,
        to_id: parse_uuid(&to_id)?,
        kind: RelationKind::parse(&kind),
        created_at: parse_datetime(&created)?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Threads ─────────────────────────────────────────────────────

    async fn ensure_thread(&self, id: Uuid, user_id: &str) -> Result<Thread, DatabaseError> {
        let now = ts(Utc::now());
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO threads (id, user_id, status, message_count, created_at, last_activity)
                 VALUES (?1, ?2, 'active', 0, ?3, ?3)",
                params![id.to_string(), user_id, now],
            )
            .await
            .map_err(|e| query_error("ensure_thread", e))?;
        if inserted > 0 {
            debug!(thread_id = %id, "Created thread");
        }

        self.get_thread(id).await?.ok_or_else(|| DatabaseError::NotFound {
            entity: "thread".into(),
            id: id.to_string(),
        })
    }

    async fn get_thread(&self, id: Uuid) -> Result<Option<Thread>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| query_error("get_thread", e))?;
        match rows.next().await.map_err(|e| query_error("get_thread", e))? {
            Some(row) => Ok(Some(row_to_thread(&row)?)),
            None => Ok(None),
        }
    }

    async fn archive_thread(&self, id: Uuid, user_id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE threads SET status = 'archived' WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id],
            )
            .await
            .map_err(|e| query_error("archive_thread", e))?;
        Ok(count > 0)
    }

    async fn append_turn(&self, turn: &NewTurn) -> Result<TurnRecord, DatabaseError> {
        let now = Utc::now();
        let thread_id = turn.thread_id.to_string();

        // The counter bump is the serialization point for turn indexes; the
        // UNIQUE(thread_id, turn_index) constraint backs it up.
        let turn_index: i64 = {
            let mut rows = self
                .conn()
                .query(
                    "UPDATE threads SET message_count = message_count + 1, last_activity = ?2
                     WHERE id = ?1 RETURNING message_count - 1",
                    params![thread_id.clone(), ts(now)],
                )
                .await
                .map_err(|e| query_error("append_turn", e))?;
            let row = rows
                .next()
                .await
                .map_err(|e| query_error("append_turn", e))?
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "thread".into(),
                    id: thread_id.clone(),
                })?;
            row.get(0).map_err(row_error)?
        };

        let record = TurnRecord {
            id: Uuid::new_v4(),
            thread_id: turn.thread_id,
            turn_index,
            user_input: turn.user_input.clone(),
            ai_response: turn.ai_response.clone(),
            intent: turn.intent,
            context_state: turn.context_state.clone(),
            actions_executed: turn.actions_executed.clone(),
            created_at: now,
        };

        let context_state = record.context_state.as_ref().map(to_json).transpose()?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO agent_logs ({TURN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    record.id.to_string(),
                    thread_id,
                    record.turn_index,
                    record.user_input.clone(),
                    record.ai_response.clone(),
                    opt_text(record.intent.map(|i| i.as_str().to_string())),
                    opt_text(context_state),
                    to_json(&record.actions_executed)?,
                    ts(record.created_at),
                ],
            )
            .await
            .map_err(|e| query_error("append_turn", e))?;

        Ok(record)
    }

    async fn last_turn(&self, thread_id: Uuid) -> Result<Option<TurnRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TURN_COLUMNS} FROM agent_logs WHERE thread_id = ?1
                     ORDER BY turn_index DESC LIMIT 1"
                ),
                params![thread_id.to_string()],
            )
            .await
            .map_err(|e| query_error("last_turn", e))?;
        match rows.next().await.map_err(|e| query_error("last_turn", e))? {
            Some(row) => Ok(Some(row_to_turn(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_turns(&self, thread_id: Uuid) -> Result<Vec<TurnRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TURN_COLUMNS} FROM agent_logs WHERE thread_id = ?1 ORDER BY turn_index ASC"
                ),
                params![thread_id.to_string()],
            )
            .await
            .map_err(|e| query_error("list_turns", e))?;
        let mut turns = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| query_error("list_turns", e))? {
            turns.push(row_to_turn(&row)?);
        }
        Ok(turns)
    }

    async fn list_threads(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ThreadSummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT t.id, t.created_at,
                    (SELECT l.ai_response FROM agent_logs l WHERE l.thread_id = t.id
                     ORDER BY l.turn_index DESC LIMIT 1),
                    (SELECT COUNT(*) FROM agent_logs l WHERE l.thread_id = t.id)
                 FROM threads t
                 WHERE t.user_id = ?1 AND t.status = 'active'
                 ORDER BY t.last_activity DESC, t.rowid DESC
                 LIMIT ?2 OFFSET ?3",
                params![user_id, limit, offset],
            )
            .await
            .map_err(|e| query_error("list_threads", e))?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| query_error("list_threads", e))? {
            let id: String = row.get(0).map_err(row_error)?;
            let created: String = row.get(1).map_err(row_error)?;
            summaries.push(ThreadSummary {
                thread_id: parse_uuid(&id)?,
                last_message: row.get(2).ok(),
                turn_count: row.get(3).map_err(row_error)?,
                created_at: parse_datetime(&created)?,
            });
        }
        Ok(summaries)
    }

    async fn delete_thread_turns(
        &self,
        thread_id: Uuid,
        user_id: &str,
    ) -> Result<Option<usize>, DatabaseError> {
        match self.get_thread(thread_id).await? {
            Some(thread) if thread.user_id == user_id => {}
            _ => return Ok(None),
        }
        let count = self
            .conn()
            .execute(
                "DELETE FROM agent_logs WHERE thread_id = ?1",
                params![thread_id.to_string()],
            )
            .await
            .map_err(|e| query_error("delete_thread_turns", e))?;
        info!(thread_id = %thread_id, deleted = count, "Deleted thread turns");
        Ok(Some(count as usize))
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let output = job.output_data.as_ref().map(to_json).transpose()?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
                ),
                params![
                    job.id.to_string(),
                    job.user_id.clone(),
                    opt_text(job.thread_id.map(|id| id.to_string())),
                    job.intent.as_str(),
                    job.worker_type.as_str(),
                    job.status.as_str(),
                    job.progress as i64,
                    to_json(&job.input_data)?,
                    opt_text(output),
                    opt_text(job.error_message.clone()),
                    job.retry_count as i64,
                    job.max_retries as i64,
                    opt_text(job.claimed_by.clone()),
                    opt_ts(job.claimed_at),
                    opt_ts(job.started_at),
                    opt_ts(job.completed_at),
                    opt_ts(job.next_retry_at),
                    ts(job.created_at),
                ],
            )
            .await
            .map_err(|e| query_error("insert_job", e))?;
        debug!(job_id = %job.id, worker_type = %job.worker_type, "Inserted job");
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        self.query_jobs_one(
            "get_job",
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id.to_string()],
        )
        .await
    }

    async fn claim_next_job(
        &self,
        worker_type: WorkerType,
        worker_id: &str,
    ) -> Result<Option<Job>, DatabaseError> {
        // The outer status guard turns the update into a compare-and-swap: if
        // a concurrent claimer took the row between subquery and update,
        // nothing is updated and nothing is returned.
        self.query_jobs_one(
            "claim_next_job",
            &format!(
                "UPDATE jobs SET status = 'claimed', claimed_by = ?1, claimed_at = ?2
                 WHERE id = (
                     SELECT id FROM jobs
                     WHERE status = 'pending' AND worker_type = ?3
                       AND (next_retry_at IS NULL OR next_retry_at <= ?2)
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT 1
                 )
                 AND status = 'pending'
                 RETURNING {JOB_COLUMNS}"
            ),
            params![worker_id, ts(Utc::now()), worker_type.as_str()],
        )
        .await
    }

    async fn start_job(&self, id: Uuid, worker_id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET status = 'processing', started_at = ?3
                 WHERE id = ?1 AND status = 'claimed' AND claimed_by = ?2",
                params![id.to_string(), worker_id, ts(Utc::now())],
            )
            .await
            .map_err(|e| query_error("start_job", e))?;
        Ok(count > 0)
    }

    async fn update_job_progress(
        &self,
        id: Uuid,
        worker_id: &str,
        progress: u8,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET progress = ?3
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?2",
                params![id.to_string(), worker_id, progress.min(100) as i64],
            )
            .await
            .map_err(|e| query_error("update_job_progress", e))?;
        Ok(count > 0)
    }

    async fn complete_job(
        &self,
        id: Uuid,
        worker_id: &str,
        output: &Value,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET status = 'completed', progress = 100, output_data = ?3,
                     error_message = NULL, completed_at = ?4
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?2",
                params![id.to_string(), worker_id, to_json(output)?, ts(Utc::now())],
            )
            .await
            .map_err(|e| query_error("complete_job", e))?;
        Ok(count > 0)
    }

    async fn schedule_job_retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET status = 'pending', retry_count = retry_count + 1,
                     error_message = ?3, next_retry_at = ?4, progress = 0,
                     claimed_by = NULL, claimed_at = NULL, started_at = NULL
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?2
                   AND retry_count < max_retries",
                params![id.to_string(), worker_id, error, ts(next_retry_at)],
            )
            .await
            .map_err(|e| query_error("schedule_job_retry", e))?;
        Ok(count > 0)
    }

    async fn fail_job(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET status = 'failed', error_message = ?3, completed_at = ?4
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?2",
                params![id.to_string(), worker_id, error, ts(Utc::now())],
            )
            .await
            .map_err(|e| query_error("fail_job", e))?;
        Ok(count > 0)
    }

    async fn cancel_job(&self, id: Uuid, user_id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET status = 'cancelled', completed_at = ?3
                 WHERE id = ?1 AND user_id = ?2 AND status IN ('pending', 'claimed')",
                params![id.to_string(), user_id, ts(Utc::now())],
            )
            .await
            .map_err(|e| query_error("cancel_job", e))?;
        Ok(count > 0)
    }

    async fn retry_failed_job(&self, id: Uuid, user_id: &str) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET status = 'pending', error_message = NULL, progress = 0,
                     output_data = NULL, claimed_by = NULL, claimed_at = NULL,
                     started_at = NULL, completed_at = NULL, next_retry_at = NULL
                 WHERE id = ?1 AND user_id = ?2 AND status = 'failed'",
                params![id.to_string(), user_id],
            )
            .await
            .map_err(|e| query_error("retry_failed_job", e))?;
        Ok(count > 0)
    }

    async fn reset_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "UPDATE jobs SET status = 'pending', progress = 0,
                     claimed_by = NULL, claimed_at = NULL, started_at = NULL
                 WHERE (status = 'claimed' AND started_at IS NULL AND claimed_at < ?1)
                    OR (status = 'processing' AND started_at < ?1)",
                params![ts(cutoff)],
            )
            .await
            .map_err(|e| query_error("reset_stale_jobs", e))?;
        Ok(count as usize)
    }

    // ── Nodes ───────────────────────────────────────────────────────

    async fn insert_node(&self, node: &Node) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO nodes ({NODE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    node.id.to_string(),
                    node.user_id.clone(),
                    node.node_type.as_str(),
                    node.title.clone(),
                    opt_text(node.category.map(|c| c.as_str().to_string())),
                    to_json(&node.tags)?,
                    opt_text(node.parent_id.map(|id| id.to_string())),
                    opt_ts(node.due_at),
                    opt_ts(node.starts_at),
                    opt_ts(node.ends_at),
                    opt_text(node.recurrence.map(|r| r.as_str().to_string())),
                    opt_text(node.source_job_id.map(|id| id.to_string())),
                    to_json(&node.metadata)?,
                    node.archived as i64,
                    ts(node.created_at),
                ],
            )
            .await
            .map_err(|e| query_error("insert_node", e))?;
        debug!(node_id = %node.id, node_type = node.node_type.as_str(), "Inserted node");
        Ok(())
    }

    async fn get_node(&self, id: Uuid) -> Result<Option<Node>, DatabaseError> {
        let mut nodes = self
            .query_nodes(
                "get_node",
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                params![id.to_string()],
            )
            .await?;
        Ok(nodes.pop())
    }

    async fn list_nodes_for_job(&self, job_id: Uuid) -> Result<Vec<Node>, DatabaseError> {
        self.query_nodes(
            "list_nodes_for_job",
            &format!(
                "SELECT {NODE_COLUMNS} FROM nodes WHERE source_job_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ),
            params![job_id.to_string()],
        )
        .await
    }

    async fn list_children(&self, parent_id: Uuid) -> Result<Vec<Node>, DatabaseError> {
        self.query_nodes(
            "list_children",
            &format!(
                "SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ),
            params![parent_id.to_string()],
        )
        .await
    }

    async fn list_active_containers(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ContainerRef>, DatabaseError> {
        let nodes = self
            .query_nodes(
                "list_active_containers",
                &format!(
                    "SELECT {NODE_COLUMNS} FROM nodes
                     WHERE user_id = ?1 AND node_type = 'container' AND archived = 0
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![user_id, limit],
            )
            .await?;
        Ok(nodes.iter().filter_map(ContainerRef::from_node).collect())
    }

    async fn insert_relation(&self, relation: &Relation) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO relations ({RELATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    relation.id.to_string(),
                    relation.user_id.clone(),
                    relation.from_id.to_string(),
                    relation.to_id.to_string(),
                    relation.kind.as_str(),
                    ts(relation.created_at),
                ],
            )
            .await
            .map_err(|e| query_error("insert_relation", e))?;
        Ok(count > 0)
    }

    async fn list_relations(&self, from_id: Uuid) -> Result<Vec<Relation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RELATION_COLUMNS} FROM relations WHERE from_id = ?1
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![from_id.to_string()],
            )
            .await
            .map_err(|e| query_error("list_relations", e))?;
        let mut relations = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| query_error("list_relations", e))? {
            relations.push(row_to_relation(&row)?);
        }
        Ok(relations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::slots::ContextState;
    use crate::jobs::model::JobInput;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_job(user: &str, intent: Intent) -> Job {
        let input = JobInput {
            user_input: "Buy milk".into(),
            ..Default::default()
        };
        Job::new(user, None, intent, &input, 3)
    }

    /// Drive a freshly inserted job into `processing` for `worker`.
    async fn claim_and_start(db: &LibSqlBackend, worker: &str) -> Job {
        let job = db
            .claim_next_job(WorkerType::Task, worker)
            .await
            .unwrap()
            .unwrap();
        assert!(db.start_job(job.id, worker).await.unwrap());
        job
    }

    // ── Thread tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn ensure_thread_is_idempotent() {
        let db = test_db().await;
        let id = Uuid::new_v4();

        let first = db.ensure_thread(id, "alice").await.unwrap();
        let second = db.ensure_thread(id, "bob").await.unwrap();

        assert_eq!(first.user_id, "alice");
        assert_eq!(second.user_id, "alice");
        assert_eq!(second.status, ThreadStatus::Active);
    }

    #[tokio::test]
    async fn turn_indexes_increase_per_thread() {
        let db = test_db().await;
        let a = db.ensure_thread(Uuid::new_v4(), "u").await.unwrap().id;
        let b = db.ensure_thread(Uuid::new_v4(), "u").await.unwrap().id;

        for i in 0..3 {
            let turn = db
                .append_turn(&NewTurn::new(a, format!("in {i}"), "out"))
                .await
                .unwrap();
            assert_eq!(turn.turn_index, i);
        }
        let other = db.append_turn(&NewTurn::new(b, "x", "y")).await.unwrap();
        assert_eq!(other.turn_index, 0);

        let thread = db.get_thread(a).await.unwrap().unwrap();
        assert_eq!(thread.message_count, 3);
        let turns = db.list_turns(a).await.unwrap();
        assert_eq!(
            turns.iter().map(|t| t.turn_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[tokio::test]
    async fn concurrent_appends_get_distinct_indexes() {
        let db = test_db().await;
        let id = db.ensure_thread(Uuid::new_v4(), "u").await.unwrap().id;

        let (t1, t2, t3) = (
            NewTurn::new(id, "a", "1"),
            NewTurn::new(id, "b", "2"),
            NewTurn::new(id, "c", "3"),
        );
        let (a, b, c) = tokio::join!(
            db.append_turn(&t1),
            db.append_turn(&t2),
            db.append_turn(&t3),
        );
        let mut indexes = vec![
            a.unwrap().turn_index,
            b.unwrap().turn_index,
            c.unwrap().turn_index,
        ];
        indexes.sort();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn append_turn_to_missing_thread_fails() {
        let db = test_db().await;
        let result = db.append_turn(&NewTurn::new(Uuid::new_v4(), "x", "y")).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn last_turn_roundtrips_context_state() {
        let db = test_db().await;
        let id = db.ensure_thread(Uuid::new_v4(), "u").await.unwrap().id;
        assert!(db.last_turn(id).await.unwrap().is_none());

        let state = ContextState {
            pending_intent: Some(Intent::QuickTodo),
            partial_data: Some(serde_json::Map::new()),
            missing_fields: vec!["title".into()],
        };
        db.append_turn(
            &NewTurn::new(id, "add a todo", "What would you like to call it?")
                .with_intent(Some(Intent::QuickTodo))
                .with_context_state(Some(state.clone())),
        )
        .await
        .unwrap();

        let last = db.last_turn(id).await.unwrap().unwrap();
        assert_eq!(last.intent, Some(Intent::QuickTodo));
        assert_eq!(last.context_state, Some(state));
    }

    #[tokio::test]
    async fn list_threads_newest_activity_first() {
        let db = test_db().await;
        let old = db.ensure_thread(Uuid::new_v4(), "u").await.unwrap().id;
        let new = db.ensure_thread(Uuid::new_v4(), "u").await.unwrap().id;
        db.ensure_thread(Uuid::new_v4(), "someone-else").await.unwrap();

        db.append_turn(&NewTurn::new(new, "a", "first")).await.unwrap();
        db.append_turn(&NewTurn::new(old, "b", "second")).await.unwrap();
        db.append_turn(&NewTurn::new(old, "c", "third")).await.unwrap();

        let threads = db.list_threads("u", 20, 0).await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].thread_id, old);
        assert_eq!(threads[0].turn_count, 2);
        assert_eq!(threads[0].last_message.as_deref(), Some("third"));

        let page = db.list_threads("u", 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].thread_id, new);
    }

    #[tokio::test]
    async fn archived_threads_are_not_listed() {
        let db = test_db().await;
        let id = db.ensure_thread(Uuid::new_v4(), "u").await.unwrap().id;

        assert!(!db.archive_thread(id, "intruder").await.unwrap());
        assert!(db.archive_thread(id, "u").await.unwrap());

        assert!(db.list_threads("u", 20, 0).await.unwrap().is_empty());
        let thread = db.get_thread(id).await.unwrap().unwrap();
        assert_eq!(thread.status, ThreadStatus::Archived);
    }

    #[tokio::test]
    async fn delete_thread_turns_requires_ownership() {
        let db = test_db().await;
        let id = db.ensure_thread(Uuid::new_v4(), "u").await.unwrap().id;
        db.append_turn(&NewTurn::new(id, "a", "b")).await.unwrap();
        db.append_turn(&NewTurn::new(id, "c", "d")).await.unwrap();

        assert_eq!(db.delete_thread_turns(id, "other").await.unwrap(), None);
        assert_eq!(
            db.delete_thread_turns(Uuid::new_v4(), "u").await.unwrap(),
            None
        );
        assert_eq!(db.delete_thread_turns(id, "u").await.unwrap(), Some(2));
        assert!(db.list_turns(id).await.unwrap().is_empty());

        // Indexes keep increasing after a purge.
        let next = db.append_turn(&NewTurn::new(id, "e", "f")).await.unwrap();
        assert_eq!(next.turn_index, 2);
    }

    // ── Job tests ───────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_get_job() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();

        let fetched = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.worker_type, WorkerType::Task);
        assert_eq!(fetched.input().user_input, "Buy milk");
        assert!(db.get_job(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_sets_claim_fields() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();

        let claimed = db
            .claim_next_job(WorkerType::Task, "task-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Claimed);
        assert_eq!(claimed.claimed_by.as_deref(), Some("task-1"));
        assert!(claimed.claimed_at.is_some());

        assert!(
            db.claim_next_job(WorkerType::Task, "task-2")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn claim_respects_worker_type() {
        let db = test_db().await;
        db.insert_job(&make_job("u", Intent::Routine)).await.unwrap();

        assert!(
            db.claim_next_job(WorkerType::Task, "t")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            db.claim_next_job(WorkerType::Calendar, "c")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let db = test_db().await;
        db.insert_job(&make_job("u", Intent::QuickTodo)).await.unwrap();

        let (a, b) = tokio::join!(
            db.claim_next_job(WorkerType::Task, "worker-a"),
            db.claim_next_job(WorkerType::Task, "worker-b"),
        );
        let winners = [a.unwrap(), b.unwrap()]
            .into_iter()
            .flatten()
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn parallel_claimers_never_share_a_job() {
        let db = Arc::new(test_db().await);
        for _ in 0..5 {
            db.insert_job(&make_job("u", Intent::QuickTodo)).await.unwrap();
        }

        let mut handles = Vec::new();
        for w in 0..8 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                db.claim_next_job(WorkerType::Task, &format!("w{w}"))
                    .await
                    .unwrap()
                    .map(|job| job.id)
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            if let Some(id) = handle.await.unwrap() {
                ids.push(id);
            }
        }
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(total, 5);
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn claims_oldest_first() {
        let db = test_db().await;
        let now = Utc::now();
        let mut newer = make_job("u", Intent::QuickTodo);
        newer.created_at = now;
        let mut older = make_job("u", Intent::QuickTodo);
        older.created_at = now - chrono::Duration::seconds(10);

        db.insert_job(&newer).await.unwrap();
        db.insert_job(&older).await.unwrap();

        let first = db.claim_next_job(WorkerType::Task, "w").await.unwrap().unwrap();
        let second = db.claim_next_job(WorkerType::Task, "w").await.unwrap().unwrap();
        assert_eq!(first.id, older.id);
        assert_eq!(second.id, newer.id);
    }

    #[tokio::test]
    async fn lifecycle_to_completed() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();

        claim_and_start(&db, "w").await;
        assert!(db.update_job_progress(job.id, "w", 50).await.unwrap());
        assert!(
            db.complete_job(job.id, "w", &serde_json::json!({"success": true}))
                .await
                .unwrap()
        );

        let done = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());
        assert_eq!(done.output_data.unwrap()["success"], true);
    }

    #[tokio::test]
    async fn transitions_reject_wrong_worker() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();
        db.claim_next_job(WorkerType::Task, "owner").await.unwrap();

        assert!(!db.start_job(job.id, "thief").await.unwrap());
        assert!(db.start_job(job.id, "owner").await.unwrap());
        assert!(!db.complete_job(job.id, "thief", &Value::Null).await.unwrap());
        assert!(!db.fail_job(job.id, "thief", "nope").await.unwrap());
    }

    #[tokio::test]
    async fn retry_hides_job_until_due() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();
        claim_and_start(&db, "w").await;

        let later = Utc::now() + chrono::Duration::seconds(60);
        assert!(db.schedule_job_retry(job.id, "w", "timeout", later).await.unwrap());

        let pending = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(pending.status, JobStatus::Pending);
        assert_eq!(pending.retry_count, 1);
        assert_eq!(pending.error_message.as_deref(), Some("timeout"));
        assert!(pending.claimed_by.is_none() && pending.claimed_at.is_none());
        assert!(pending.started_at.is_none());

        assert!(db.claim_next_job(WorkerType::Task, "w").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_due_job_is_claimable() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();
        claim_and_start(&db, "w").await;

        let past = Utc::now() - chrono::Duration::seconds(1);
        assert!(db.schedule_job_retry(job.id, "w", "flaky", past).await.unwrap());
        let again = db.claim_next_job(WorkerType::Task, "w2").await.unwrap().unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.retry_count, 1);
    }

    #[tokio::test]
    async fn retry_never_exceeds_max() {
        let db = test_db().await;
        let mut job = make_job("u", Intent::QuickTodo);
        job.max_retries = 1;
        db.insert_job(&job).await.unwrap();

        claim_and_start(&db, "w").await;
        let past = Utc::now() - chrono::Duration::seconds(1);
        assert!(db.schedule_job_retry(job.id, "w", "e1", past).await.unwrap());

        claim_and_start(&db, "w").await;
        assert!(!db.schedule_job_retry(job.id, "w", "e2", past).await.unwrap());
        assert!(db.fail_job(job.id, "w", "e2").await.unwrap());

        let failed = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.retry_count, 1);
    }

    #[tokio::test]
    async fn stale_claim_is_reset() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();
        db.claim_next_job(WorkerType::Task, "crashed").await.unwrap();

        // Claimed just now: not stale relative to a cutoff in the past.
        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        assert_eq!(db.reset_stale_jobs(cutoff).await.unwrap(), 0);

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(db.reset_stale_jobs(cutoff).await.unwrap(), 1);

        let reset = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert!(reset.claimed_by.is_none());
        assert!(reset.claimed_at.is_none());
        assert_eq!(reset.retry_count, 0);
    }

    #[tokio::test]
    async fn stale_processing_is_reset_and_old_owner_loses() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();
        claim_and_start(&db, "slow").await;
        assert!(db.update_job_progress(job.id, "slow", 60).await.unwrap());

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(db.reset_stale_jobs(cutoff).await.unwrap(), 1);

        assert!(!db.complete_job(job.id, "slow", &Value::Null).await.unwrap());
        let reset = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert!(reset.started_at.is_none());
        assert_eq!(reset.progress, 0);
    }

    #[tokio::test]
    async fn malformed_timestamp_is_an_error() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();
        db.conn()
            .execute(
                "UPDATE jobs SET created_at = 'yesterday-ish' WHERE id = ?1",
                params![job.id.to_string()],
            )
            .await
            .unwrap();

        match db.get_job(job.id).await {
            Err(DatabaseError::Serialization(msg)) => assert!(msg.contains("yesterday-ish")),
            other => panic!("expected a serialization error, got {other:?}"),
        }
    }

    #[test]
    fn parses_rfc3339_and_sqlite_timestamps() {
        let rfc = parse_datetime("2026-03-11T09:00:00.123456Z").unwrap();
        let sqlite = parse_datetime("2026-03-11 09:00:00.123456").unwrap();
        assert_eq!(rfc, sqlite);
        assert!(parse_datetime("").is_err());
        assert_eq!(parse_optional_datetime(None).unwrap(), None);
    }

    #[tokio::test]
    async fn cancel_only_before_processing() {
        let db = test_db().await;
        let pending = make_job("u", Intent::QuickTodo);
        db.insert_job(&pending).await.unwrap();

        assert!(!db.cancel_job(pending.id, "other-user").await.unwrap());
        assert!(db.cancel_job(pending.id, "u").await.unwrap());
        let cancelled = db.get_job(pending.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        let running = make_job("u", Intent::QuickTodo);
        db.insert_job(&running).await.unwrap();
        claim_and_start(&db, "w").await;
        assert!(!db.cancel_job(running.id, "u").await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_claim_cannot_start() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();
        db.claim_next_job(WorkerType::Task, "w").await.unwrap();

        assert!(db.cancel_job(job.id, "u").await.unwrap());
        assert!(!db.start_job(job.id, "w").await.unwrap());
    }

    #[tokio::test]
    async fn user_retry_resets_failed_job() {
        let db = test_db().await;
        let job = make_job("u", Intent::QuickTodo);
        db.insert_job(&job).await.unwrap();
        claim_and_start(&db, "w").await;
        db.update_job_progress(job.id, "w", 40).await.unwrap();
        db.fail_job(job.id, "w", "bad input").await.unwrap();

        assert!(!db.retry_failed_job(job.id, "someone").await.unwrap());
        assert!(db.retry_failed_job(job.id, "u").await.unwrap());

        let retried = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert!(retried.error_message.is_none());
        assert_eq!(retried.progress, 0);
        assert!(retried.claimed_by.is_none());
        assert!(retried.started_at.is_none());
        assert!(retried.completed_at.is_none());
        assert!(retried.next_retry_at.is_none());

        // Only failed jobs can be retried.
        assert!(!db.retry_failed_job(job.id, "u").await.unwrap());
    }

    // ── Node tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn node_roundtrip() {
        let db = test_db().await;
        let job_id = Uuid::new_v4();
        let due = Utc::now();
        let node = Node::new("u", NodeType::Task, "Read chapter 3")
            .with_category(Category::Course)
            .with_tags(vec!["reading".into()])
            .with_due(Some(due))
            .with_source_job(job_id);
        db.insert_node(&node).await.unwrap();

        let fetched = db.get_node(node.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "Read chapter 3");
        assert_eq!(fetched.category, Some(Category::Course));
        assert_eq!(fetched.tags, vec!["reading".to_string()]);
        assert_eq!(
            fetched.due_at.map(|d| d.timestamp_micros()),
            Some(due.timestamp_micros())
        );

        let by_job = db.list_nodes_for_job(job_id).await.unwrap();
        assert_eq!(by_job.len(), 1);
        assert_eq!(by_job[0].id, node.id);
    }

    #[tokio::test]
    async fn active_containers_exclude_archived_and_tasks() {
        let db = test_db().await;
        let course = Node::new("u", NodeType::Container, "CS101").with_category(Category::Course);
        let mut archived = Node::new("u", NodeType::Container, "Old club").with_category(Category::Club);
        archived.archived = true;
        let task = Node::new("u", NodeType::Task, "Homework");
        let foreign = Node::new("v", NodeType::Container, "Theirs");
        for node in [&course, &archived, &task, &foreign] {
            db.insert_node(node).await.unwrap();
        }

        let containers = db.list_active_containers("u", 20).await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].title, "CS101");
        assert_eq!(containers[0].category, Category::Course);
    }

    #[tokio::test]
    async fn relations_are_deduplicated() {
        let db = test_db().await;
        let parent = Node::new("u", NodeType::Container, "Thesis");
        let child = Node::new("u", NodeType::Task, "Outline").with_parent(Some(parent.id));
        db.insert_node(&parent).await.unwrap();
        db.insert_node(&child).await.unwrap();

        let rel = Relation::new("u", child.id, parent.id, RelationKind::SubtaskOf);
        assert!(db.insert_relation(&rel).await.unwrap());
        let dup = Relation::new("u", child.id, parent.id, RelationKind::SubtaskOf);
        assert!(!db.insert_relation(&dup).await.unwrap());

        let relations = db.list_relations(child.id).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].kind, RelationKind::SubtaskOf);

        let children = db.list_children(parent.id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);
    }

    #[tokio::test]
    async fn new_local_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("planner.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.insert_job(&make_job("u", Intent::QuickTodo)).await.unwrap();
        assert!(path.exists());
    }
}
