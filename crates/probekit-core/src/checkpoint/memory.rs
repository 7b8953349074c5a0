//! In-process `CheckpointRepository`.
//!
//! Holds everything behind one mutex; no lock is held across an await.
//! Suitable for tests and short-lived embedding where durability is not
//! needed. Ordering matches the SQLite repository.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use probekit_types::checkpoint::{
    Checkpoint, NewTransition, RecoveryQuery, Session, SessionStatus, Transition,
    truncate_to_millis,
};
use probekit_types::error::RepositoryError;

use crate::repository::CheckpointRepository;

#[derive(Debug, Default)]
struct MemoryState {
    checkpoints: HashMap<String, Checkpoint>,
    sessions: HashMap<String, Session>,
    transitions: Vec<Transition>,
    next_transition_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state.lock().map_err(|_| RepositoryError::Connection)
    }
}

fn by_age(a: &Checkpoint, b: &Checkpoint) -> std::cmp::Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.checkpoint_id.cmp(&b.checkpoint_id))
}

impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let mut stored = checkpoint.clone();
        stored.timestamp = truncate_to_millis(stored.timestamp);
        self.lock()?
            .checkpoints
            .insert(stored.checkpoint_id.clone(), stored);
        Ok(())
    }

    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self.lock()?.checkpoints.get(checkpoint_id).cloned())
    }

    async fn find_latest_checkpoint(
        &self,
        query: &RecoveryQuery,
    ) -> Result<Option<Checkpoint>, RepositoryError> {
        Ok(self
            .lock()?
            .checkpoints
            .values()
            .filter(|cp| query.matches(cp))
            .max_by(|a, b| by_age(a, b))
            .cloned())
    }

    async fn list_checkpoints(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        let mut checkpoints: Vec<Checkpoint> = self
            .lock()?
            .checkpoints
            .values()
            .filter(|cp| cp.workflow_id == workflow_id && cp.thread_id == thread_id)
            .cloned()
            .collect();
        checkpoints.sort_by(by_age);
        Ok(checkpoints)
    }

    async fn prune_checkpoints(
        &self,
        workflow_id: &str,
        thread_id: &str,
        keep: usize,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.lock()?;
        let mut owned: Vec<&Checkpoint> = state
            .checkpoints
            .values()
            .filter(|cp| cp.workflow_id == workflow_id && cp.thread_id == thread_id)
            .collect();
        if owned.len() <= keep {
            return Ok(0);
        }
        owned.sort_by(|a, b| by_age(b, a));
        let doomed: Vec<String> = owned
            .into_iter()
            .skip(keep)
            .map(|cp| cp.checkpoint_id.clone())
            .collect();
        for id in &doomed {
            state.checkpoints.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.lock()?.checkpoints.remove(checkpoint_id).is_some())
    }

    async fn create_session(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state.sessions.contains_key(&session.session_id) {
            return Err(RepositoryError::Conflict(format!(
                "session '{}' already exists",
                session.session_id
            )));
        }
        state
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, RepositoryError> {
        Ok(self.lock()?.sessions.get(session_id).cloned())
    }

    async fn list_sessions(
        &self,
        workflow_id: &str,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>, RepositoryError> {
        let mut sessions: Vec<Session> = self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.workflow_id == workflow_id)
            .filter(|s| status.is_none_or(|status| s.status == status))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| b.session_id.cmp(&a.session_id))
        });
        Ok(sessions)
    }

    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or(RepositoryError::NotFound)?;
        session.status = status;
        session.updated_at = truncate_to_millis(updated_at);
        Ok(())
    }

    async fn touch_latest_session(
        &self,
        workflow_id: &str,
        thread_id: &str,
        checkpoint_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.lock()?;
        let latest = state
            .sessions
            .values_mut()
            .filter(|s| s.workflow_id == workflow_id && s.thread_id == thread_id)
            .max_by(|a, b| {
                a.start_time
                    .cmp(&b.start_time)
                    .then_with(|| a.session_id.cmp(&b.session_id))
            });
        match latest {
            Some(session) => {
                session.last_checkpoint_id = Some(checkpoint_id.to_string());
                session.updated_at = truncate_to_millis(updated_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn prune_sessions(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.lock()?;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.start_time >= older_than);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn record_transition(&self, transition: &NewTransition) -> Result<i64, RepositoryError> {
        let mut state = self.lock()?;
        state.next_transition_id += 1;
        let id = state.next_transition_id;
        state
            .transitions
            .push(Transition::from_new(id, transition.clone()));
        Ok(id)
    }

    async fn transition_history(
        &self,
        workflow_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Vec<Transition>, RepositoryError> {
        let mut history: Vec<Transition> = self
            .lock()?
            .transitions
            .iter()
            .filter(|t| t.workflow_id == workflow_id)
            .filter(|t| thread_id.is_none_or(|thread| t.thread_id == thread))
            .cloned()
            .collect();
        history.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.transition_id.cmp(&b.transition_id))
        });
        Ok(history)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use probekit_types::checkpoint::now_millis;
    use serde_json::json;

    fn checkpoint_at(thread: &str, offset_ms: i64) -> Checkpoint {
        Checkpoint::new("wf", thread, json!({"offset": offset_ms}))
            .with_timestamp(now_millis() + Duration::milliseconds(offset_ms))
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let repo = InMemoryCheckpointRepository::new();
        let cp = checkpoint_at("main", 0);
        repo.save_checkpoint(&cp).await.unwrap();

        let mut updated = cp.clone();
        updated.state = json!({"offset": "changed"});
        repo.save_checkpoint(&updated).await.unwrap();

        let loaded = repo.load_checkpoint(&cp.checkpoint_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, json!({"offset": "changed"}));
        assert_eq!(repo.list_checkpoints("wf", "main").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn prune_keeps_newest() {
        let repo = InMemoryCheckpointRepository::new();
        for offset in 0..5 {
            repo.save_checkpoint(&checkpoint_at("main", offset * 10))
                .await
                .unwrap();
        }
        repo.save_checkpoint(&checkpoint_at("other", 0)).await.unwrap();

        assert_eq!(repo.prune_checkpoints("wf", "main", 2).await.unwrap(), 3);
        let kept = repo.list_checkpoints("wf", "main").await.unwrap();
        let offsets: Vec<i64> = kept
            .iter()
            .map(|cp| cp.state["offset"].as_i64().unwrap())
            .collect();
        assert_eq!(offsets, vec![30, 40]);
        assert_eq!(repo.list_checkpoints("wf", "other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn touch_updates_latest_session_only() {
        let repo = InMemoryCheckpointRepository::new();
        let mut old = Session::start("wf", "main", None);
        old.start_time -= Duration::seconds(60);
        let new = Session::start("wf", "main", None);
        repo.create_session(&old).await.unwrap();
        repo.create_session(&new).await.unwrap();

        assert!(repo
            .touch_latest_session("wf", "main", "cp-1", now_millis())
            .await
            .unwrap());
        assert!(!repo
            .touch_latest_session("wf", "nobody", "cp-1", now_millis())
            .await
            .unwrap());

        let new = repo.get_session(&new.session_id).await.unwrap().unwrap();
        let old = repo.get_session(&old.session_id).await.unwrap().unwrap();
        assert_eq!(new.last_checkpoint_id.as_deref(), Some("cp-1"));
        assert!(old.last_checkpoint_id.is_none());
    }

    #[tokio::test]
    async fn update_missing_session_is_not_found() {
        let repo = InMemoryCheckpointRepository::new();
        let err = repo
            .update_session_status("missing", SessionStatus::Completed, now_millis())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn transitions_get_increasing_ids() {
        let repo = InMemoryCheckpointRepository::new();
        let transition = NewTransition {
            checkpoint_id: "cp".to_string(),
            workflow_id: "wf".to_string(),
            thread_id: "main".to_string(),
            from_node: None,
            to_node: "scan".to_string(),
            transition_type: "stage_started".to_string(),
            timestamp: now_millis(),
            duration_ms: None,
        };
        let first = repo.record_transition(&transition).await.unwrap();
        let second = repo.record_transition(&transition).await.unwrap();
        assert!(second > first);
        assert_eq!(repo.transition_history("wf", None).await.unwrap().len(), 2);
        assert!(repo
            .transition_history("wf", Some("other"))
            .await
            .unwrap()
            .is_empty());
    }
}
