//! Checkpoint and session store.
//!
//! - `store` -- `CheckpointStore`: saves with retention, recovery, sessions,
//!   transitions and auto-save timers over any `CheckpointRepository`
//! - `memory` -- in-process repository
//! - `schedule` -- cancellable periodic task driving auto-save
//! - `adapter` -- get/put facade for external graph runtimes

pub mod adapter;
pub mod memory;
pub mod schedule;
pub mod store;

pub use adapter::CheckpointAdapter;
pub use memory::InMemoryCheckpointRepository;
pub use store::{CheckpointStore, CheckpointStoreError};
