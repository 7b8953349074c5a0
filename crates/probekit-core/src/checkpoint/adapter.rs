//! Minimal get/put checkpoint interface for external graph runtimes.

use std::future::Future;

use probekit_types::checkpoint::{Checkpoint, RecoveryQuery};

use super::store::{CheckpointStore, CheckpointStoreError};
use crate::repository::CheckpointRepository;

/// Latest-checkpoint lookup and save, keyed by workflow and thread.
pub trait CheckpointAdapter: Send + Sync {
    /// The newest checkpoint of a workflow+thread.
    fn get(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> impl Future<Output = Result<Option<Checkpoint>, CheckpointStoreError>> + Send;

    /// Persist a checkpoint and return its id.
    fn put(
        &self,
        checkpoint: Checkpoint,
    ) -> impl Future<Output = Result<String, CheckpointStoreError>> + Send;
}

impl<R: CheckpointRepository + 'static> CheckpointAdapter for CheckpointStore<R> {
    async fn get(
        &self,
        workflow_id: &str,
        thread_id: &str,
    ) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        self.recover_state(&RecoveryQuery::for_workflow(workflow_id).thread(thread_id))
            .await
    }

    async fn put(&self, checkpoint: Checkpoint) -> Result<String, CheckpointStoreError> {
        self.save_checkpoint(&checkpoint).await?;
        Ok(checkpoint.checkpoint_id)
    }
}
