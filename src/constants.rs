//! Constants used throughout BeemFlow
//!
//! This module contains all constant values used in the BeemFlow runtime,
//! including configuration paths, adapter identifiers, and engine defaults.

use once_cell::sync::Lazy;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Get the home directory with fallback to current directory
pub fn get_home_dir() -> &'static str {
    static HOME_DIR: Lazy<String> = Lazy::new(|| {
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string())
    });
    &HOME_DIR
}

/// Default config directory (~/.beemflow)
pub fn default_config_dir() -> &'static str {
    static CONFIG_DIR: Lazy<String> = Lazy::new(|| format!("{}/.beemflow", get_home_dir()));
    &CONFIG_DIR
}

/// Default SQLite DSN (~/.beemflow/flow.db)
pub fn default_sqlite_dsn() -> &'static str {
    static SQLITE_DSN: Lazy<String> = Lazy::new(|| format!("{}/flow.db", default_config_dir()));
    &SQLITE_DSN
}

/// Default flows directory (flows)
pub const DEFAULT_FLOWS_DIR: &str = "flows";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "flow.config.json";

/// Flow file extension
pub const FLOW_FILE_EXTENSION: &str = ".flow.yaml";

/// Storage driver: in-memory
pub const STORAGE_DRIVER_MEMORY: &str = "memory";

/// Storage driver: SQLite
pub const STORAGE_DRIVER_SQLITE: &str = "sqlite";

/// Storage driver: PostgreSQL
pub const STORAGE_DRIVER_POSTGRES: &str = "postgres";

// ============================================================================
// ADAPTERS & TOOLS
// ============================================================================

/// Core adapter identifier
pub const ADAPTER_ID_CORE: &str = "core";

/// HTTP adapter identifier
pub const HTTP_ADAPTER_ID: &str = "http";

/// Core adapter prefix
pub const ADAPTER_PREFIX_CORE: &str = "core.";

/// Special parameter carrying the original `use:` identifier
pub const PARAM_SPECIAL_USE: &str = "__use";

/// Core tool: echo
pub const CORE_ECHO: &str = "core.echo";

/// Core tool: log
pub const CORE_LOG: &str = "core.log";

/// Core tool: wait (handled by the interpreter as a durable pause)
pub const CORE_WAIT: &str = "core.wait";

// ============================================================================
// ENGINE & EXECUTION
// ============================================================================

/// Template field: event
pub const TEMPLATE_FIELD_EVENT: &str = "event";

/// Template field: vars
pub const TEMPLATE_FIELD_VARS: &str = "vars";

/// Template field: steps
pub const TEMPLATE_FIELD_STEPS: &str = "steps";

/// Template field: outputs
pub const TEMPLATE_FIELD_OUTPUTS: &str = "outputs";

/// Context key holding catch-handler error details
pub const TEMPLATE_FIELD_ERROR: &str = "error";

/// Match key: token
pub const MATCH_KEY_TOKEN: &str = "token";

/// Event topic prefix for resume signals (resume:<token>)
pub const EVENT_TOPIC_RESUME_PREFIX: &str = "resume:";

/// Wildcard key in a flow's catch map
pub const CATCH_WILDCARD: &str = "*";

/// Maximum fixed-point template render passes
pub const MAX_RENDER_PASSES: usize = 5;

/// Maximum retry backoff delay in seconds
pub const MAX_RETRY_DELAY_SEC: u64 = 300;

/// Default cap on concurrently executing parallel children
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 64;

/// Template open delimiter
pub const TEMPLATE_OPEN_DELIM: &str = "{{";

/// Template close delimiter
pub const TEMPLATE_CLOSE_DELIM: &str = "}}";

// ============================================================================
// HTTP & API
// ============================================================================

/// Default HTTP listen address
pub const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:3330";

/// Header: Content-Type
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// Content type: JSON
pub const CONTENT_TYPE_JSON: &str = "application/json";
