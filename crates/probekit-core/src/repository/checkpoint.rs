//! Checkpoint repository trait definition.
//!
//! Defines the storage interface for checkpoints, sessions and the transition
//! audit trail. The infrastructure layer (probekit-infra) implements this
//! trait with SQLite persistence; `checkpoint::memory` provides an in-process
//! implementation.

use chrono::{DateTime, Utc};
use probekit_types::checkpoint::{
    Checkpoint, NewTransition, RecoveryQuery, Session, SessionStatus, Transition,
};
use probekit_types::error::RepositoryError;

/// Repository trait for checkpoint persistence.
///
/// Covers three entity families:
/// - **Checkpoints:** upsert, lookup, recovery queries and retention pruning.
/// - **Sessions:** lifecycle records per workflow+thread.
/// - **Transitions:** append-only audit entries.
///
/// Ordering ties on equal timestamps are broken by id so every backend
/// returns the same sequence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Insert a checkpoint, or replace the stored one with the same id.
    fn save_checkpoint(
        &self,
        checkpoint: &Checkpoint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn load_checkpoint(
        &self,
        checkpoint_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// The newest checkpoint matching every filter in `query`.
    fn find_latest_checkpoint(
        &self,
        query: &RecoveryQuery,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Checkpoints of one workflow+thread, oldest first.
    fn list_checkpoints(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;

    /// Delete all but the `keep` newest checkpoints of a workflow+thread.
    /// Returns the number deleted.
    fn prune_checkpoints(
        &self,
        workflow_id: &str,
        thread_id: &str,
        keep: usize,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Returns `true` if the checkpoint existed.
    fn delete_checkpoint(
        &self,
        checkpoint_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    fn create_session(
        &self,
        session: &Session,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_session(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Session>, RepositoryError>> + Send;

    /// Sessions of a workflow, newest start first, optionally filtered by status.
    fn list_sessions(
        &self,
        workflow_id: &str,
        status: Option<SessionStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<Session>, RepositoryError>> + Send;

    /// Set a session's status. `RepositoryError::NotFound` if it does not exist.
    fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        updated_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Point the most recently started session of a workflow+thread at a new
    /// checkpoint. Returns `false` when no such session exists.
    fn touch_latest_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
        checkpoint_id: &str,
        updated_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete sessions started before `older_than`. Returns the number deleted.
    fn prune_sessions(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Append a transition and return its assigned id.
    ///
    /// `checkpoint_id` is a plain reference, not an enforced foreign key:
    /// the checkpoint may be pruned later while its transitions stay in
    /// the history.
    fn record_transition(
        &self,
        transition: &NewTransition,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    /// Transitions of a workflow (optionally one thread), oldest first.
    fn transition_history(
        &self,
        workflow_id: &str,
        thread_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<Transition>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Release underlying resources. Further calls may fail.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}
