//! Plugin catalog metadata.

use serde::{Deserialize, Serialize};

/// Static description of a diagnostic plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Registry key (e.g. "protocol", "discovery").
    pub id: String,
    pub title: String,
    /// Grouping used for listing (e.g. "protocol", "security").
    pub category: String,
    /// Suggested position when running the whole catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

impl PluginInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category: category.into(),
            order: None,
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = Some(order);
        self
    }
}
