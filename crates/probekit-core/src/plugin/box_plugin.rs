//! Object-safe dynamic dispatch wrapper for `Plugin`.
//!
//! Same blanket-impl pattern as the LLM provider wrapper:
//! 1. Define an object-safe `PluginDyn` trait with boxed futures
//! 2. Blanket-impl `PluginDyn` for all `T: Plugin`
//! 3. The registry stores `Arc<dyn PluginDyn>`

use std::future::Future;
use std::pin::Pin;

use probekit_types::finding::Finding;
use probekit_types::plugin::PluginInfo;
use serde_json::Value;

use super::{Plugin, PluginContext, PluginError};

/// Object-safe version of [`Plugin`] with boxed futures.
pub trait PluginDyn: Send + Sync {
    fn info(&self) -> &PluginInfo;

    fn schema(&self) -> Option<Value>;

    fn run_boxed<'a>(
        &'a self,
        ctx: &'a PluginContext,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Finding>, PluginError>> + Send + 'a>>;
}

impl<T: Plugin> PluginDyn for T {
    fn info(&self) -> &PluginInfo {
        Plugin::info(self)
    }

    fn schema(&self) -> Option<Value> {
        Plugin::schema(self)
    }

    fn run_boxed<'a>(
        &'a self,
        ctx: &'a PluginContext,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Finding>, PluginError>> + Send + 'a>> {
        Box::pin(self.run(ctx))
    }
}
