//! Configuration types for Probekit.
//!
//! `ProbekitConfig` represents the top-level `config.toml`. Every field has a
//! default so an empty or partial file is valid.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbekitConfig {
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Checkpoint/session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoints retained per (workflow, thread); oldest pruned first.
    /// `0` disables pruning.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
    /// Auto-save period in milliseconds.
    #[serde(default = "default_auto_save_interval_ms")]
    pub auto_save_interval_ms: u64,
    #[serde(default)]
    pub session_status_policy: SessionStatusPolicy,
}

fn default_max_checkpoints() -> usize {
    10
}

fn default_auto_save_interval_ms() -> u64 {
    5_000
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_checkpoints: default_max_checkpoints(),
            auto_save_interval_ms: default_auto_save_interval_ms(),
            session_status_policy: SessionStatusPolicy::default(),
        }
    }
}

/// Whether session status updates are guarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatusPolicy {
    /// Any status may overwrite any other, including terminal ones.
    #[default]
    Permissive,
    /// `completed`/`failed` sessions reject further status changes.
    RejectFromTerminal,
}

/// Workflow engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently running stages within one batch.
    /// `None` dispatches the whole batch at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_concurrency: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ProbekitConfig::default();
        assert_eq!(config.checkpoint.max_checkpoints, 10);
        assert_eq!(config.checkpoint.auto_save_interval_ms, 5_000);
        assert_eq!(
            config.checkpoint.session_status_policy,
            SessionStatusPolicy::Permissive
        );
        assert!(config.engine.max_batch_concurrency.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ProbekitConfig = toml::from_str(
            r#"
[checkpoint]
max_checkpoints = 3
session_status_policy = "reject_from_terminal"

[engine]
max_batch_concurrency = 4
"#,
        )
        .unwrap();
        assert_eq!(config.checkpoint.max_checkpoints, 3);
        assert_eq!(config.checkpoint.auto_save_interval_ms, 5_000);
        assert_eq!(
            config.checkpoint.session_status_policy,
            SessionStatusPolicy::RejectFromTerminal
        );
        assert_eq!(config.engine.max_batch_concurrency, Some(4));
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config: ProbekitConfig = toml::from_str("").unwrap();
        assert_eq!(config.checkpoint.max_checkpoints, 10);
    }
}
