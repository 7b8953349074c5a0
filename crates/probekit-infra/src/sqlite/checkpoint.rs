//! SQLite checkpoint repository implementation.
//!
//! Implements `CheckpointRepository` from `probekit-core` using sqlx with split
//! read/write pools. State and metadata are stored as JSON text; timestamps as
//! INTEGER epoch milliseconds.

use chrono::{DateTime, Utc};
use probekit_core::repository::CheckpointRepository;
use probekit_types::checkpoint::{
    Checkpoint, NewTransition, RecoveryQuery, Session, SessionStatus, Transition,
};
use probekit_types::error::RepositoryError;
use serde_json::Value;
use sqlx::{QueryBuilder, Row, Sqlite};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointRepository`.
pub struct SqliteCheckpointRepository {
    pool: DatabasePool,
}

impl SqliteCheckpointRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct CheckpointRow {
    checkpoint_id: String,
    workflow_id: String,
    thread_id: String,
    state_json: String,
    timestamp: i64,
    metadata_json: Option<String>,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            checkpoint_id: row.try_get("checkpoint_id")?,
            workflow_id: row.try_get("workflow_id")?,
            thread_id: row.try_get("thread_id")?,
            state_json: row.try_get("state_json")?,
            timestamp: row.try_get("timestamp")?,
            metadata_json: row.try_get("metadata_json")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        Ok(Checkpoint {
            checkpoint_id: self.checkpoint_id,
            workflow_id: self.workflow_id,
            thread_id: self.thread_id,
            state: parse_json(&self.state_json, "state")?,
            timestamp: from_millis(self.timestamp)?,
            metadata: self
                .metadata_json
                .as_deref()
                .map(|s| parse_json(s, "metadata"))
                .transpose()?,
        })
    }
}

struct SessionRow {
    session_id: String,
    workflow_id: String,
    thread_id: String,
    start_time: i64,
    last_checkpoint_id: Option<String>,
    status: String,
    metadata_json: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl SessionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            session_id: row.try_get("session_id")?,
            workflow_id: row.try_get("workflow_id")?,
            thread_id: row.try_get("thread_id")?,
            start_time: row.try_get("start_time")?,
            last_checkpoint_id: row.try_get("last_checkpoint_id")?,
            status: row.try_get("status")?,
            metadata_json: row.try_get("metadata_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_session(self) -> Result<Session, RepositoryError> {
        let status: SessionStatus = self.status.parse().map_err(RepositoryError::Query)?;
        Ok(Session {
            session_id: self.session_id,
            workflow_id: self.workflow_id,
            thread_id: self.thread_id,
            start_time: from_millis(self.start_time)?,
            last_checkpoint_id: self.last_checkpoint_id,
            status,
            metadata: self
                .metadata_json
                .as_deref()
                .map(|s| parse_json(s, "metadata"))
                .transpose()?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

struct TransitionRow {
    transition_id: i64,
    checkpoint_id: String,
    workflow_id: String,
    thread_id: String,
    from_node: Option<String>,
    to_node: String,
    transition_type: String,
    timestamp: i64,
    duration_ms: Option<i64>,
}

impl TransitionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            transition_id: row.try_get("transition_id")?,
            checkpoint_id: row.try_get("checkpoint_id")?,
            workflow_id: row.try_get("workflow_id")?,
            thread_id: row.try_get("thread_id")?,
            from_node: row.try_get("from_node")?,
            to_node: row.try_get("to_node")?,
            transition_type: row.try_get("transition_type")?,
            timestamp: row.try_get("timestamp")?,
            duration_ms: row.try_get("duration_ms")?,
        })
    }

    fn into_transition(self) -> Result<Transition, RepositoryError> {
        Ok(Transition {
            transition_id: self.transition_id,
            checkpoint_id: self.checkpoint_id,
            workflow_id: self.workflow_id,
            thread_id: self.thread_id,
            from_node: self.from_node,
            to_node: self.to_node,
            transition_type: self.transition_type,
            timestamp: from_millis(self.timestamp)?,
            duration_ms: self.duration_ms.map(|d| d.max(0) as u64),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| RepositoryError::Query(format!("invalid timestamp: {ms}")))
}

fn parse_json(s: &str, field: &str) -> Result<Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {field} JSON: {e}")))
}

fn to_json(value: &Value, field: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize {field}: {e}")))
}

fn map_query(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// CheckpointRepository impl
// ---------------------------------------------------------------------------

impl CheckpointRepository for SqliteCheckpointRepository {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let state_json = to_json(&checkpoint.state, "state")?;
        let metadata_json = checkpoint
            .metadata
            .as_ref()
            .map(|m| to_json(m, "metadata"))
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO checkpoints (checkpoint_id, workflow_id, thread_id, state_json, timestamp, metadata_json)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(checkpoint_id) DO UPDATE SET
                 workflow_id = excluded.workflow_id,
                 thread_id = excluded.thread_id,
                 state_json = excluded.state_json,
                 timestamp = excluded.timestamp,
                 metadata_json = excluded.metadata_json"#,
        )
        .bind(&checkpoint.checkpoint_id)
        .bind(&checkpoint.workflow_id)
        .bind(&checkpoint.thread_id)
        .bind(&state_json)
        .bind(to_millis(&checkpoint.timestamp))
        .bind(&metadata_json)
        .execute(&self.pool.writer)
        .await
        .map_err(map_query)?;

        Ok(())
    }

    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE checkpoint_id = ?")
            .bind(checkpoint_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_query)?;

        match row {
            Some(row) => {
                let r = CheckpointRow::from_row(&row).map_err(map_query)?;
                Ok(Some(r.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn find_latest_checkpoint(
        &self,
        query: &RecoveryQuery,
    ) -> Result<Option<Checkpoint>, RepositoryError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM checkpoints WHERE workflow_id = ");
        builder.push_bind(&query.workflow_id);
        if let Some(thread_id) = &query.thread_id {
            builder.push(" AND thread_id = ").push_bind(thread_id);
        }
        if let Some(checkpoint_id) = &query.checkpoint_id {
            builder.push(" AND checkpoint_id = ").push_bind(checkpoint_id);
        }
        if let Some(before) = &query.before {
            builder.push(" AND timestamp < ").push_bind(to_millis(before));
        }
        builder.push(" ORDER BY timestamp DESC, checkpoint_id DESC LIMIT 1");

        let row = builder
            .build()
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_query)?;

        match row {
            Some(row) => {
                let r = CheckpointRow::from_row(&row).map_err(map_query)?;
                Ok(Some(r.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn list_checkpoints(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM checkpoints WHERE workflow_id = ? AND thread_id = ? ORDER BY timestamp ASC, checkpoint_id ASC",
        )
        .bind(workflow_id)
        .bind(thread_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_query)?;

        rows.iter()
            .map(|row| {
                CheckpointRow::from_row(row)
                    .map_err(map_query)
                    .and_then(CheckpointRow::into_checkpoint)
            })
            .collect()
    }

    async fn prune_checkpoints(
        &self,
        workflow_id: &str,
        thread_id: &str,
        keep: usize,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"DELETE FROM checkpoints WHERE checkpoint_id IN (
                 SELECT checkpoint_id FROM checkpoints
                 WHERE workflow_id = ? AND thread_id = ?
                 ORDER BY timestamp DESC, checkpoint_id DESC
                 LIMIT -1 OFFSET ?
               )"#,
        )
        .bind(workflow_id)
        .bind(thread_id)
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .execute(&self.pool.writer)
        .await
        .map_err(map_query)?;

        Ok(result.rows_affected())
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE checkpoint_id = ?")
            .bind(checkpoint_id)
            .execute(&self.pool.writer)
            .await
            .map_err(map_query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let metadata_json = session
            .metadata
            .as_ref()
            .map(|m| to_json(m, "metadata"))
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO sessions (session_id, workflow_id, thread_id, start_time, last_checkpoint_id, status, metadata_json, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&session.session_id)
        .bind(&session.workflow_id)
        .bind(&session.thread_id)
        .bind(to_millis(&session.start_time))
        .bind(&session.last_checkpoint_id)
        .bind(session.status.as_str())
        .bind(&metadata_json)
        .bind(to_millis(&session.created_at))
        .bind(to_millis(&session.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("session '{}' already exists", session.session_id))
            }
            other => map_query(other),
        })?;

        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_query)?;

        match row {
            Some(row) => {
                let r = SessionRow::from_row(&row).map_err(map_query)?;
                Ok(Some(r.into_session()?))
            }
            None => Ok(None),
        }
    }

    async fn list_sessions(
        &self,
        workflow_id: &str,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>, RepositoryError> {
        let rows = match status {
            Some(status) => sqlx::query(
                "SELECT * FROM sessions WHERE workflow_id = ? AND status = ? ORDER BY start_time DESC, session_id DESC",
            )
            .bind(workflow_id)
            .bind(status.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_query)?,
            None => sqlx::query(
                "SELECT * FROM sessions WHERE workflow_id = ? ORDER BY start_time DESC, session_id DESC",
            )
            .bind(workflow_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_query)?,
        };

        rows.iter()
            .map(|row| {
                SessionRow::from_row(row)
                    .map_err(map_query)
                    .and_then(SessionRow::into_session)
            })
            .collect()
    }

    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE sessions SET status = ?, updated_at = ? WHERE session_id = ?")
            .bind(status.as_str())
            .bind(to_millis(&updated_at))
            .bind(session_id)
            .execute(&self.pool.writer)
            .await
            .map_err(map_query)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn touch_latest_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
        checkpoint_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE sessions SET last_checkpoint_id = ?, updated_at = ?
               WHERE session_id = (
                 SELECT session_id FROM sessions
                 WHERE workflow_id = ? AND thread_id = ?
                 ORDER BY start_time DESC, session_id DESC
                 LIMIT 1
               )"#,
        )
        .bind(checkpoint_id)
        .bind(to_millis(&updated_at))
        .bind(workflow_id)
        .bind(thread_id)
        .execute(&self.pool.writer)
        .await
        .map_err(map_query)?;

        Ok(result.rows_affected() > 0)
    }

    async fn prune_sessions(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM sessions WHERE start_time < ?")
            .bind(to_millis(&older_than))
            .execute(&self.pool.writer)
            .await
            .map_err(map_query)?;

        Ok(result.rows_affected())
    }

    async fn record_transition(&self, transition: &NewTransition) -> Result<i64, RepositoryError> {
        let duration_ms = transition
            .duration_ms
            .map(|d| i64::try_from(d).unwrap_or(i64::MAX));

        let result = sqlx::query(
            r#"INSERT INTO transitions (checkpoint_id, workflow_id, thread_id, from_node, to_node, transition_type, timestamp, duration_ms)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&transition.checkpoint_id)
        .bind(&transition.workflow_id)
        .bind(&transition.thread_id)
        .bind(&transition.from_node)
        .bind(&transition.to_node)
        .bind(&transition.transition_type)
        .bind(to_millis(&transition.timestamp))
        .bind(duration_ms)
        .execute(&self.pool.writer)
        .await
        .map_err(map_query)?;

        Ok(result.last_insert_rowid())
    }

    async fn transition_history(
        &self,
        workflow_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Vec<Transition>, RepositoryError> {
        let rows = match thread_id {
            Some(thread_id) => sqlx::query(
                "SELECT * FROM transitions WHERE workflow_id = ? AND thread_id = ? ORDER BY timestamp ASC, transition_id ASC",
            )
            .bind(workflow_id)
            .bind(thread_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_query)?,
            None => sqlx::query(
                "SELECT * FROM transitions WHERE workflow_id = ? ORDER BY timestamp ASC, transition_id ASC",
            )
            .bind(workflow_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_query)?,
        };

        rows.iter()
            .map(|row| {
                TransitionRow::from_row(row)
                    .map_err(map_query)
                    .and_then(TransitionRow::into_transition)
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
