//! Configuration management for BeemFlow
//!
//! Loads configuration from flow.config.json with environment overrides.
//! Everything has a sensible default, so a bare `flow serve` works with an
//! SQLite database under ~/.beemflow.

use crate::{BeemFlowError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete BeemFlow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Event bus configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventConfig>,

    /// HTTP server configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpConfig>,

    /// Logging configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,

    /// Flows directory override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flows_dir: Option<String>,

    /// Runtime limits configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitsConfig>,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Driver name (memory, sqlite, postgres)
    pub driver: String,

    /// Data source name / connection string
    pub dsn: String,
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Driver (memory is the in-process default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Listen address (host:port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter (e.g. "beemflow=debug")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Runtime limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Cap on concurrently executing parallel children
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: crate::constants::STORAGE_DRIVER_SQLITE.to_string(),
            dsn: crate::constants::default_sqlite_dsn().to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            event: None,
            http: None,
            log: None,
            flows_dir: None,
            limits: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            BeemFlowError::config(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| BeemFlowError::config(format!("invalid config: {}", e)))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load flow.config.json from the working directory, or defaults
    pub fn load_or_default() -> Self {
        let path = Path::new(crate::constants::CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            match Self::load(path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "falling back to default configuration");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config
    }

    /// Environment variables win over file values
    fn apply_env_overrides(&mut self) {
        if let Ok(driver) = std::env::var("BEEMFLOW_STORAGE_DRIVER") {
            self.storage.driver = driver;
        }
        if let Ok(dsn) = std::env::var("BEEMFLOW_STORAGE_DSN") {
            self.storage.dsn = dsn;
        }
        if let Ok(addr) = std::env::var("BEEMFLOW_HTTP_ADDR") {
            self.http.get_or_insert_with(|| HttpConfig { addr: None }).addr = Some(addr);
        }
        if let Ok(dir) = std::env::var("BEEMFLOW_FLOWS_DIR") {
            self.flows_dir = Some(dir);
        }
    }

    /// Directory flow files are resolved from
    pub fn flows_dir(&self) -> &str {
        self.flows_dir
            .as_deref()
            .unwrap_or(crate::constants::DEFAULT_FLOWS_DIR)
    }

    /// HTTP listen address
    pub fn http_addr(&self) -> &str {
        self.http
            .as_ref()
            .and_then(|h| h.addr.as_deref())
            .unwrap_or(crate::constants::DEFAULT_HTTP_ADDR)
    }

    /// Parallel-task concurrency cap
    pub fn max_concurrent_tasks(&self) -> usize {
        self.limits
            .as_ref()
            .and_then(|l| l.max_concurrent_tasks)
            .unwrap_or(crate::constants::DEFAULT_MAX_CONCURRENT_TASKS)
    }
}

#[cfg(test)]
mod config_test;
