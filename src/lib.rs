//! BeemFlow - Workflow orchestration runtime
//!
//! This library provides a workflow engine that interprets declarative flow
//! definitions and runs them as persistent, resumable processes. It can be:
//! - Used as a library in other Rust applications
//! - Run as a CLI tool (`flow` binary)
//! - Exposed as an HTTP API server
//!
//! # Architecture
//!
//! - Text-first YAML/JSON workflow definitions
//! - Template-based parameterization (minijinja)
//! - Pluggable adapters for tools and services
//! - Multiple storage backends (in-memory, SQLite, PostgreSQL)
//! - Durable pause/resume: an `await_event` or `wait` step persists a
//!   continuation that survives restarts and wakes on a correlated event
//!
//! # Example
//!
//! ```rust,no_run
//! use beemflow::engine::Engine;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = beemflow::config::Config::load_or_default();
//!     let engine = Engine::from_config(&config).await?;
//!
//!     let flow = beemflow::dsl::parse_file("flow.yaml")?;
//!     let result = engine
//!         .execute(&flow, Default::default(), CancellationToken::new())
//!         .await?;
//!     println!("{:?}", result.outputs);
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod constants;
pub mod error;
pub mod model;
#[cfg(test)]
mod model_test;

// Execution components
pub mod adapter;
pub mod cli;
pub mod dsl;
pub mod engine;

// Infrastructure
pub mod config;
pub mod event;
pub mod storage;

// Interface layers
pub mod http;

// Re-exports for convenience
pub use engine::Engine;
pub use error::{BeemFlowError, Result};
pub use model::{Flow, Run, Step, StepKind};

/// Initialize logging for the application
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "beemflow=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
