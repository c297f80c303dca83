//! Method registry: explicit name-to-handler mapping.
//!
//! Routing is by registration, never by reflection over a handler
//! object; an unregistered name is an explicit error path in the
//! pipeline, not a missing-property fallback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use relay_rpc::RpcError;

use crate::rpc::context::CallContext;

/// Trait implemented by every RPC method handler.
///
/// Handlers raise expected failures as structured [`RpcError`]s;
/// anything else (panics, timeouts) is contained at the pipeline
/// boundary.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and call context.
    async fn handle(&self, params: Option<Value>, ctx: &CallContext) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a method name.
    ///
    /// Registering the same name twice replaces the earlier handler.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Look up the handler for a method.
    pub fn get(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(method).cloned()
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
