//! Static plugin catalog.
//!
//! Built once at startup, then shared read-only (`Arc<PluginRegistry>`) by the
//! orchestrator. Lookups are by plugin id.

use std::collections::HashMap;
use std::sync::Arc;

use probekit_types::plugin::PluginInfo;
use serde_json::Value;

use super::{Plugin, PluginDyn};

/// A catalog entry: metadata, optional schema, and the runnable plugin.
#[derive(Clone)]
pub struct RegisteredPlugin {
    pub info: PluginInfo,
    pub schema: Option<Value>,
    pub plugin: Arc<dyn PluginDyn>,
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("info", &self.info)
            .field("has_schema", &self.schema.is_some())
            .finish()
    }
}

/// Errors raised while building the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),
}

/// Plugin id -> plugin catalog.
#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, RegisteredPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its `info().id`. Ids are registered once.
    pub fn register<P: Plugin + 'static>(&mut self, plugin: P) -> Result<(), RegistryError> {
        let plugin: Arc<dyn PluginDyn> = Arc::new(plugin);
        self.register_arc(plugin)
    }

    /// Register an already type-erased plugin.
    pub fn register_arc(&mut self, plugin: Arc<dyn PluginDyn>) -> Result<(), RegistryError> {
        let info = plugin.info().clone();
        if self.plugins.contains_key(&info.id) {
            return Err(RegistryError::DuplicatePlugin(info.id));
        }
        tracing::debug!(plugin_id = info.id.as_str(), category = info.category.as_str(), "registered plugin");
        let schema = plugin.schema();
        self.plugins.insert(
            info.id.clone(),
            RegisteredPlugin {
                info,
                schema,
                plugin,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredPlugin> {
        self.plugins.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.contains_key(id)
    }

    /// All plugin metadata, sorted by `order` (unordered last) then id.
    pub fn list(&self) -> Vec<&PluginInfo> {
        let mut infos: Vec<&PluginInfo> = self.plugins.values().map(|p| &p.info).collect();
        infos.sort_by(|a, b| {
            a.order
                .unwrap_or(u32::MAX)
                .cmp(&b.order.unwrap_or(u32::MAX))
                .then_with(|| a.id.cmp(&b.id))
        });
        infos
    }

    /// Plugin metadata in one category, in `list()` order.
    pub fn by_category(&self, category: &str) -> Vec<&PluginInfo> {
        self.list()
            .into_iter()
            .filter(|info| info.category == category)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
