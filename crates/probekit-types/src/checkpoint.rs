//! Checkpoint, session and transition types.
//!
//! A `Checkpoint` is a durable snapshot of workflow/thread state. A `Session`
//! is the lifecycle record of one workflow+thread execution across many
//! checkpoints. A `Transition` is an append-only audit entry describing a move
//! between two graph nodes.
//!
//! All timestamps are kept at millisecond precision so they survive storage
//! as epoch milliseconds without drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time truncated to millisecond precision.
pub fn now_millis() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

/// Drop sub-millisecond precision from a timestamp.
pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(dt)
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub workflow_id: String,
    pub thread_id: String,
    pub state: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Checkpoint {
    /// Create a checkpoint with a fresh UUIDv7 id stamped with the current time.
    pub fn new(
        workflow_id: impl Into<String>,
        thread_id: impl Into<String>,
        state: serde_json::Value,
    ) -> Self {
        Self {
            checkpoint_id: Uuid::now_v7().to_string(),
            workflow_id: workflow_id.into(),
            thread_id: thread_id.into(),
            state,
            timestamp: now_millis(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = truncate_to_millis(timestamp);
        self
    }
}

/// Filters for `recover_state`. All supplied filters must match.
#[derive(Debug, Clone, Default)]
pub struct RecoveryQuery {
    pub workflow_id: String,
    pub thread_id: Option<String>,
    pub checkpoint_id: Option<String>,
    /// Strict upper bound on the checkpoint timestamp.
    pub before: Option<DateTime<Utc>>,
}

impl RecoveryQuery {
    pub fn for_workflow(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            ..Default::default()
        }
    }

    pub fn thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    /// Whether a checkpoint satisfies every supplied filter.
    pub fn matches(&self, checkpoint: &Checkpoint) -> bool {
        checkpoint.workflow_id == self.workflow_id
            && self
                .thread_id
                .as_ref()
                .is_none_or(|t| &checkpoint.thread_id == t)
            && self
                .checkpoint_id
                .as_ref()
                .is_none_or(|c| &checkpoint.checkpoint_id == c)
            && self.before.is_none_or(|b| checkpoint.timestamp < b)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Interrupted,
}

impl SessionStatus {
    /// `Completed` and `Failed` end a session.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "interrupted" => Ok(SessionStatus::Interrupted),
            other => Err(format!("invalid session status: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub workflow_id: String,
    pub thread_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_id: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A new active session starting now.
    pub fn start(
        workflow_id: impl Into<String>,
        thread_id: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = now_millis();
        Self {
            session_id: Uuid::now_v7().to_string(),
            workflow_id: workflow_id.into(),
            thread_id: thread_id.into(),
            start_time: now,
            last_checkpoint_id: None,
            status: SessionStatus::Active,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// A transition to be appended to the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransition {
    pub checkpoint_id: String,
    pub workflow_id: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_node: Option<String>,
    pub to_node: String,
    /// Free-form kind, e.g. "stage_completed", "resume".
    pub transition_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A stored transition. `transition_id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub transition_id: i64,
    pub checkpoint_id: String,
    pub workflow_id: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_node: Option<String>,
    pub to_node: String,
    pub transition_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Transition {
    pub fn from_new(transition_id: i64, new: NewTransition) -> Self {
        Self {
            transition_id,
            checkpoint_id: new.checkpoint_id,
            workflow_id: new.workflow_id,
            thread_id: new.thread_id,
            from_node: new.from_node,
            to_node: new.to_node,
            transition_type: new.transition_type,
            timestamp: truncate_to_millis(new.timestamp),
            duration_ms: new.duration_ms,
        }
    }
}
