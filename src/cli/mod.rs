//! Command-line interface
//!
//! Thin wrapper over the engine: run a flow file, validate it, serve the
//! HTTP API, manage runs, resume by token, publish events.

use crate::config::Config;
use crate::engine::Engine;
use crate::{BeemFlowError, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "flow", version, about = "BeemFlow workflow runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow from a YAML file
    Run {
        /// Path to the flow file
        file: PathBuf,

        /// Trigger event as a JSON object
        #[arg(long)]
        event: Option<String>,
    },

    /// Parse and validate a flow file
    Validate {
        /// Path to the flow file
        file: PathBuf,
    },

    /// Start the HTTP API server
    Serve {
        /// Listen address (host:port)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Inspect and manage runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },

    /// Resume a paused run by token
    Resume {
        token: String,

        /// Resume payload as a JSON object
        #[arg(long)]
        event: Option<String>,
    },

    /// Publish an event to the bus
    Publish {
        topic: String,

        /// Event payload as JSON
        #[arg(long)]
        payload: Option<String>,
    },
}

#[derive(Subcommand)]
enum RunsCommands {
    /// List all runs
    List,
    /// Show one run with its steps
    Get { id: Uuid },
    /// Delete a run
    Delete { id: Uuid },
}

/// CLI entry point
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default();

    match cli.command {
        Commands::Run { file, event } => {
            let flow = crate::dsl::load_flow(&file, HashMap::new())?;
            let event = parse_object(event.as_deref())?;
            let engine = Engine::from_config(&config).await?;

            match engine.execute(&flow, event, CancellationToken::new()).await {
                Ok(result) => {
                    println!("Run {} succeeded", result.run_id);
                    print_json(&result.outputs)?;
                }
                Err(e) if e.is_pause() => {
                    println!(
                        "Run paused; resume with: flow resume {}",
                        e.pause_token().unwrap_or_default()
                    );
                }
                Err(e) => return Err(e),
            }
            engine.close();
        }

        Commands::Validate { file } => {
            crate::dsl::load_flow(&file, HashMap::new())?;
            println!("{} is valid", file.display());
        }

        Commands::Serve { addr } => {
            let mut config = config;
            if let Some(addr) = addr {
                config.http = Some(crate::config::HttpConfig { addr: Some(addr) });
            }
            let engine = Engine::from_config(&config).await?;
            crate::http::serve(engine, Arc::new(config)).await?;
        }

        Commands::Runs { command } => {
            let engine = Engine::from_config(&config).await?;
            match command {
                RunsCommands::List => {
                    for run in engine.list_runs().await? {
                        println!(
                            "{}  {:<24}  {:?}  {}",
                            run.id,
                            run.flow_name,
                            run.status,
                            run.started_at.to_rfc3339()
                        );
                    }
                }
                RunsCommands::Get { id } => {
                    let run = engine
                        .get_run(id)
                        .await?
                        .ok_or_else(|| BeemFlowError::not_found("run", id.to_string()))?;
                    print_json(&run)?;
                }
                RunsCommands::Delete { id } => {
                    engine.delete_run(id).await?;
                    println!("Deleted run {}", id);
                }
            }
            engine.close();
        }

        Commands::Resume { token, event } => {
            let event = parse_object(event.as_deref())?;
            let engine = Engine::from_config(&config).await?;

            match engine.resume(&token, event, CancellationToken::new()).await {
                Ok(result) => {
                    println!("Run {} succeeded", result.run_id);
                    print_json(&result.outputs)?;
                }
                Err(e) if e.is_pause() => {
                    println!(
                        "Run paused again; resume with: flow resume {}",
                        e.pause_token().unwrap_or_default()
                    );
                }
                Err(e) => return Err(e),
            }
            engine.close();
        }

        Commands::Publish { topic, payload } => {
            let payload: Value = match payload {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| BeemFlowError::validation(format!("invalid payload: {}", e)))?,
                None => Value::Object(serde_json::Map::new()),
            };
            let engine = Engine::from_config(&config).await?;
            engine.publish(&topic, payload).await?;
            println!("Published to {}", topic);
            engine.close();
        }
    }

    Ok(())
}

fn parse_object(raw: Option<&str>) -> Result<HashMap<String, Value>> {
    let Some(raw) = raw else {
        return Ok(HashMap::new());
    };
    serde_json::from_str(raw)
        .map_err(|e| BeemFlowError::validation(format!("invalid event JSON: {}", e)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
