//! Checkpoint/session store.
//!
//! Wraps a `CheckpointRepository` with the store's behaviour: the session
//! pointer update and retention pruning that follow every save, the session
//! status policy, and per-(workflow, thread) auto-save timers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use probekit_types::checkpoint::{
    Checkpoint, NewTransition, RecoveryQuery, Session, SessionStatus, Transition, now_millis,
};
use probekit_types::config::{CheckpointConfig, SessionStatusPolicy};
use probekit_types::error::RepositoryError;
use serde_json::{Value, json};

use super::schedule::ScheduledTask;
use crate::repository::CheckpointRepository;

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Durable checkpoints, sessions and transitions for workflow threads.
///
/// Generic over `R: CheckpointRepository` so it works with any storage
/// backend (SQLite, in-memory, etc.).
pub struct CheckpointStore<R: CheckpointRepository> {
    repo: Arc<R>,
    config: CheckpointConfig,
    /// Active auto-save timers keyed by (workflow_id, thread_id).
    auto_saves: DashMap<(String, String), ScheduledTask>,
}

impl<R: CheckpointRepository + 'static> CheckpointStore<R> {
    pub fn new(repo: R, config: CheckpointConfig) -> Self {
        Self::from_arc(Arc::new(repo), config)
    }

    pub fn from_arc(repo: Arc<R>, config: CheckpointConfig) -> Self {
        Self {
            repo,
            config,
            auto_saves: DashMap::new(),
        }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    /// Upsert a checkpoint, point the owning session at it, and prune the
    /// thread down to `max_checkpoints`.
    pub async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError> {
        persist_checkpoint(self.repo.as_ref(), self.config.max_checkpoints, checkpoint).await
    }

    pub async fn load_checkpoint(
        &self,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        Ok(self.repo.load_checkpoint(checkpoint_id).await?)
    }

    /// The newest checkpoint matching `query`, if any.
    pub async fn recover_state(
        &self,
        query: &RecoveryQuery,
    ) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        let found = self.repo.find_latest_checkpoint(query).await?;
        tracing::debug!(
            workflow_id = query.workflow_id.as_str(),
            thread_id = ?query.thread_id,
            found = found.is_some(),
            "recover state"
        );
        Ok(found)
    }

    /// Checkpoints of a workflow+thread, oldest first.
    pub async fn list_checkpoints(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Vec<Checkpoint>, CheckpointStoreError> {
        Ok(self.repo.list_checkpoints(workflow_id, thread_id).await?)
    }

    pub async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool, CheckpointStoreError> {
        Ok(self.repo.delete_checkpoint(checkpoint_id).await?)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Start an active session and return its id.
    pub async fn create_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
        metadata: Option<Value>,
    ) -> Result<String, CheckpointStoreError> {
        let session = Session::start(workflow_id, thread_id, metadata);
        self.repo.create_session(&session).await?;
        tracing::info!(
            session_id = session.session_id.as_str(),
            workflow_id,
            thread_id,
            "session started"
        );
        Ok(session.session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, CheckpointStoreError> {
        Ok(self.repo.get_session(session_id).await?)
    }

    /// Sessions of a workflow, newest first.
    pub async fn list_sessions(
        &self,
        workflow_id: &str,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>, CheckpointStoreError> {
        Ok(self.repo.list_sessions(workflow_id, status).await?)
    }

    /// Set a session's status, subject to the configured policy.
    pub async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<(), CheckpointStoreError> {
        if self.config.session_status_policy == SessionStatusPolicy::RejectFromTerminal {
            let current = self
                .repo
                .get_session(session_id)
                .await?
                .ok_or_else(|| CheckpointStoreError::SessionNotFound(session_id.to_string()))?;
            if current.status.is_terminal() && current.status != status {
                return Err(CheckpointStoreError::TerminalSession {
                    session_id: session_id.to_string(),
                    status: current.status,
                });
            }
        }

        self.repo
            .update_session_status(session_id, status, now_millis())
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => CheckpointStoreError::SessionNotFound(session_id.to_string()),
                other => CheckpointStoreError::Storage(other),
            })?;
        tracing::info!(session_id, status = %status, "session status updated");
        Ok(())
    }

    /// Delete sessions that started before `older_than`.
    pub async fn prune_sessions(&self, older_than: DateTime<Utc>) -> Result<u64, CheckpointStoreError> {
        let pruned = self.repo.prune_sessions(older_than).await?;
        if pruned > 0 {
            tracing::info!(pruned, %older_than, "pruned sessions");
        }
        Ok(pruned)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    pub async fn record_transition(&self, transition: &NewTransition) -> Result<i64, CheckpointStoreError> {
        let id = self.repo.record_transition(transition).await?;
        tracing::debug!(
            transition_id = id,
            workflow_id = transition.workflow_id.as_str(),
            to_node = transition.to_node.as_str(),
            kind = transition.transition_type.as_str(),
            "recorded transition"
        );
        Ok(id)
    }

    /// Transitions of a workflow (optionally one thread), oldest first.
    pub async fn get_transition_history(
        &self,
        workflow_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Vec<Transition>, CheckpointStoreError> {
        Ok(self.repo.transition_history(workflow_id, thread_id).await?)
    }

    // -----------------------------------------------------------------------
    // Auto-save
    // -----------------------------------------------------------------------

    /// Periodically checkpoint the state returned by `get_state` for a
    /// workflow+thread, every `auto_save_interval_ms`.
    ///
    /// Returns `false` and leaves the running timer alone if auto-save is
    /// already active for the pair. Failures of `get_state` or of the save
    /// are logged and the timer keeps running.
    ///
    /// # Panics
    ///
    /// The timer is spawned on the current Tokio runtime, so this panics if
    /// called outside one.
    pub fn enable_auto_save<F>(&self, workflow_id: &str, thread_id: &str, get_state: F) -> bool
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let key = (workflow_id.to_string(), thread_id.to_string());
        match self.auto_saves.entry(key) {
            Entry::Occupied(entry) if entry.get().is_running() => {
                tracing::debug!(workflow_id, thread_id, "auto-save already active");
                false
            }
            Entry::Occupied(mut entry) => {
                entry.insert(self.spawn_auto_save(workflow_id, thread_id, get_state)).cancel();
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn_auto_save(workflow_id, thread_id, get_state));
                true
            }
        }
    }

    fn spawn_auto_save<F>(&self, workflow_id: &str, thread_id: &str, get_state: F) -> ScheduledTask
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let period = Duration::from_millis(self.config.auto_save_interval_ms.max(1));
        let repo = Arc::clone(&self.repo);
        let max_checkpoints = self.config.max_checkpoints;
        let get_state = Arc::new(get_state);
        let (wf, thread) = (workflow_id.to_string(), thread_id.to_string());

        let task = ScheduledTask::spawn("checkpoint-auto-save", period, move || {
            let repo = Arc::clone(&repo);
            let get_state = Arc::clone(&get_state);
            let (wf, thread) = (wf.clone(), thread.clone());
            async move {
                let state = match get_state() {
                    Ok(state) => state,
                    Err(e) => {
                        tracing::warn!(workflow_id = wf.as_str(), thread_id = thread.as_str(), error = %e, "auto-save state capture failed");
                        return;
                    }
                };
                let checkpoint =
                    Checkpoint::new(wf.as_str(), thread.as_str(), state).with_metadata(json!({"autoSaved": true}));
                if let Err(e) = persist_checkpoint(repo.as_ref(), max_checkpoints, &checkpoint).await {
                    tracing::warn!(workflow_id = wf.as_str(), thread_id = thread.as_str(), error = %e, "auto-save failed");
                }
            }
        });
        tracing::info!(workflow_id, thread_id, interval_ms = period.as_millis() as u64, "auto-save enabled");
        task
    }

    /// Stop the auto-save timer for a workflow+thread. Returns `false` if none
    /// was running. A save already in progress finishes, including its
    /// session update and pruning; no further saves happen once this returns.
    pub async fn disable_auto_save(&self, workflow_id: &str, thread_id: &str) -> bool {
        let key = (workflow_id.to_string(), thread_id.to_string());
        match self.auto_saves.remove(&key) {
            Some((_, task)) => {
                task.shutdown().await;
                tracing::info!(workflow_id, thread_id, "auto-save disabled");
                true
            }
            None => false,
        }
    }

    pub fn is_auto_save_active(&self, workflow_id: &str, thread_id: &str) -> bool {
        self.auto_saves
            .get(&(workflow_id.to_string(), thread_id.to_string()))
            .is_some_and(|task| task.is_running())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stop every auto-save timer, then close the repository.
    pub async fn close(&self) {
        let keys: Vec<(String, String)> = self.auto_saves.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, task)) = self.auto_saves.remove(&key) {
                task.shutdown().await;
            }
        }
        self.repo.close().await;
        tracing::debug!("checkpoint store closed");
    }
}

/// Save, point the latest session of the thread at the checkpoint, prune.
async fn persist_checkpoint<R: CheckpointRepository>(
    repo: &R,
    max_checkpoints: usize,
    checkpoint: &Checkpoint,
) -> Result<(), CheckpointStoreError> {
    repo.save_checkpoint(checkpoint).await?;
    repo.touch_latest_session(
        &checkpoint.workflow_id,
        &checkpoint.thread_id,
        &checkpoint.checkpoint_id,
        now_millis(),
    )
    .await?;

    let pruned = if max_checkpoints > 0 {
        repo.prune_checkpoints(&checkpoint.workflow_id, &checkpoint.thread_id, max_checkpoints)
            .await?
    } else {
        0
    };

    tracing::debug!(
        checkpoint_id = checkpoint.checkpoint_id.as_str(),
        workflow_id = checkpoint.workflow_id.as_str(),
        thread_id = checkpoint.thread_id.as_str(),
        pruned,
        "checkpoint saved"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// CheckpointStoreError
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CheckpointStoreError {
    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session '{session_id}' is {status} and cannot change status")]
    TerminalSession {
        session_id: String,
        status: SessionStatus,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
