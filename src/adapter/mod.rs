//! Adapter system for tool execution
//!
//! Adapters provide a unified interface for executing different types of
//! tools. The engine resolves a step's `use:` identifier to an adapter and
//! calls `execute(inputs, ctx)`; it is agnostic to how the adapter is
//! implemented (built-in function, HTTP call, subprocess).

pub mod core;
pub mod http;

use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-invocation context handed to adapters
///
/// Carries the caller's cancellation signal; long-running adapters must
/// observe it so that deleting a run bounds in-flight work.
#[derive(Clone)]
pub struct ExecutionContext {
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// Adapter trait for tool execution
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Get adapter ID
    fn id(&self) -> &str;

    /// Execute a tool with given inputs
    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<String, Value>>;
}

/// Registry of adapters
pub struct AdapterRegistry {
    adapters: Arc<DashMap<String, Arc<dyn Adapter>>>,
}

impl AdapterRegistry {
    /// Create a new adapter registry
    pub fn new() -> Self {
        Self {
            adapters: Arc::new(DashMap::new()),
        }
    }

    /// Register an adapter
    pub fn register(&self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Get an adapter by ID
    pub fn get(&self, id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(id).map(|entry| Arc::clone(&*entry))
    }

    /// Resolve a tool name to an adapter
    ///
    /// Exact registry match wins; `core.*` tools route to the core adapter;
    /// everything else falls back to the generic HTTP adapter, matching how
    /// registry-defined tools execute.
    pub fn resolve(&self, tool_name: &str) -> Result<Arc<dyn Adapter>> {
        if let Some(adapter) = self.get(tool_name) {
            return Ok(adapter);
        }

        if tool_name.starts_with(crate::constants::ADAPTER_PREFIX_CORE) {
            return self.get(crate::constants::ADAPTER_ID_CORE).ok_or_else(|| {
                crate::BeemFlowError::adapter("core adapter not registered")
            });
        }

        self.get(crate::constants::HTTP_ADAPTER_ID).ok_or_else(|| {
            crate::BeemFlowError::adapter(format!(
                "adapter not found: {} (and HTTP adapter not available)",
                tool_name
            ))
        })
    }

    /// Get all adapters
    pub fn all(&self) -> Vec<Arc<dyn Adapter>> {
        self.adapters
            .iter()
            .map(|entry| Arc::clone(&*entry))
            .collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub use self::core::CoreAdapter;
pub use self::http::HttpAdapter;
