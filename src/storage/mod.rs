//! Storage backends for BeemFlow
//!
//! Durable state for runs, step runs, paused continuations, and wait
//! registrations, behind a single trait. Individual operations are atomic;
//! the engine sequences its writes so that crash recovery always sees a
//! well-formed state (continuation persisted before subscriptions exist,
//! step results persisted before the walk advances).

pub mod memory;
pub mod postgres;
pub mod sql_common;
pub mod sqlite;

use crate::{model::*, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A registered wait: a pause token with an optional wake deadline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitRegistration {
    /// Correlation token of the paused run
    pub token: String,

    /// Unix timestamp at which the wait expires, when a timeout was set
    pub wake_at: Option<i64>,
}

/// Storage trait for persisting runs, steps, waits, and continuations
#[async_trait]
pub trait Storage: Send + Sync {
    // Run methods
    /// Save (upsert) a run
    async fn save_run(&self, run: &Run) -> Result<()>;

    /// Get a run by ID
    async fn get_run(&self, id: Uuid) -> Result<Option<Run>>;

    /// List all runs, most recent first
    async fn list_runs(&self) -> Result<Vec<Run>>;

    /// Delete a run and its steps
    async fn delete_run(&self, id: Uuid) -> Result<()>;

    /// Try to insert a run atomically
    /// Returns true if inserted, false if a run with this ID already exists
    async fn try_insert_run(&self, run: &Run) -> Result<bool>;

    /// Most recently started run for a flow name
    async fn get_latest_run_by_flow_name(&self, name: &str) -> Result<Option<Run>>;

    // Step methods
    /// Save a step execution record
    async fn save_step(&self, step: &StepRun) -> Result<()>;

    /// Get steps for a run, in insertion order
    async fn get_steps(&self, run_id: Uuid) -> Result<Vec<StepRun>>;

    // Wait/timeout methods
    /// Register a wait token with optional wake time
    async fn register_wait(&self, token: &str, wake_at: Option<i64>) -> Result<()>;

    /// Resolve a wait token, removing the registration
    /// Returns the registration when one existed
    async fn resolve_wait(&self, token: &str) -> Result<Option<WaitRegistration>>;

    // Paused run methods
    /// Save a paused run continuation
    async fn save_paused_run(&self, token: &str, data: serde_json::Value) -> Result<()>;

    /// Load all paused runs, keyed by token
    async fn load_paused_runs(&self) -> Result<HashMap<String, serde_json::Value>>;

    /// Delete a paused run
    async fn delete_paused_run(&self, token: &str) -> Result<()>;

    /// Atomically fetch and delete a paused run
    ///
    /// This is the resume commit point: exactly one caller observes the
    /// continuation, so duplicate wake-ups cannot double-resume.
    async fn fetch_and_delete_paused_run(&self, token: &str) -> Result<Option<serde_json::Value>>;
}

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;

/// Create a storage backend from configuration
pub async fn create_storage_from_config(
    config: &crate::config::StorageConfig,
) -> Result<Arc<dyn Storage>> {
    match config.driver.as_str() {
        crate::constants::STORAGE_DRIVER_MEMORY => Ok(Arc::new(MemoryStorage::new())),
        crate::constants::STORAGE_DRIVER_SQLITE => {
            Ok(Arc::new(SqliteStorage::new(&config.dsn).await?))
        }
        crate::constants::STORAGE_DRIVER_POSTGRES => {
            Ok(Arc::new(PostgresStorage::new(&config.dsn).await?))
        }
        other => Err(crate::BeemFlowError::config(format!(
            "Unknown storage driver: {}. Supported: memory, sqlite, postgres",
            other
        ))),
    }
}

#[cfg(test)]
mod storage_test;
