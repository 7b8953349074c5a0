//! Plugin contract consumed by the orchestrator.
//!
//! - `Plugin` -- the trait diagnostic plugins implement (RPITIT async `run`)
//! - `box_plugin` -- object-safe wrapper so heterogeneous plugins share a registry
//! - `registry` -- the static id -> plugin catalog

pub mod box_plugin;
pub mod registry;

use std::collections::HashMap;
use std::future::Future;

use probekit_types::finding::Finding;
use probekit_types::plugin::PluginInfo;
use serde_json::{Map, Value};

pub use box_plugin::PluginDyn;
pub use registry::{PluginRegistry, RegisteredPlugin, RegistryError};

// ---------------------------------------------------------------------------
// PluginContext
// ---------------------------------------------------------------------------

/// Caller-supplied context handed to every plugin invocation.
///
/// The core never interprets `target` or `attributes`; it only adds the
/// stage's mapped upstream data under `inputs` before dispatch.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    /// Endpoint under diagnosis (URL, command line, etc.).
    pub target: String,
    /// Plugins should avoid time- or randomness-dependent output when set.
    pub deterministic: bool,
    /// Free-form caller data (probe settings, credentials handles, ...).
    pub attributes: HashMap<String, Value>,
    /// Data mapped from upstream stages, keyed by input field name.
    pub inputs: Map<String, Value>,
}

impl PluginContext {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Clone this context with `inputs` replaced.
    pub fn with_inputs(&self, inputs: Map<String, Value>) -> Self {
        Self {
            inputs,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Plugin trait
// ---------------------------------------------------------------------------

/// A diagnostic check runnable by the orchestrator.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for the async `run`,
/// consistent with the project's Rust 2024 edition approach.
pub trait Plugin: Send + Sync {
    fn info(&self) -> &PluginInfo;

    /// JSON schema describing accepted `attributes`, if any.
    fn schema(&self) -> Option<Value> {
        None
    }

    fn run(
        &self,
        ctx: &PluginContext,
    ) -> impl Future<Output = Result<Vec<Finding>, PluginError>> + Send;
}

/// Errors a plugin may report from `run`.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid plugin input: {0}")]
    InvalidInput(String),

    #[error("target unavailable: {0}")]
    Unavailable(String),
}
