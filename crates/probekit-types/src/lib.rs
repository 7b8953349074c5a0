//! Shared domain types for Probekit.
//!
//! This crate contains the domain types used across the Probekit workspace:
//! findings, plugin metadata, workflow definitions, execution results,
//! checkpoints/sessions/transitions, configuration, and the repository error.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod finding;
pub mod plugin;
pub mod workflow;
