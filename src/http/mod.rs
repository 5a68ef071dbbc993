//! HTTP API for the engine
//!
//! A thin axum layer over the engine-facing operations: start a run, inspect
//! and delete runs, resume by token, publish events. Flow names resolve to
//! files under the configured flows directory.

use crate::config::Config;
use crate::engine::Engine;
use crate::model::Run;
use crate::{BeemFlowError, Result};
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared state behind every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub config: Arc<Config>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/runs", post(start_run).get(list_runs))
        .route("/runs/{id}", get(get_run).delete(delete_run))
        .route("/resume/{token}", post(resume_run))
        .route("/events", post(publish_event))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(engine: Engine, config: Arc<Config>) -> Result<()> {
    let addr = config.http_addr().to_string();
    let app = router(AppState { engine, config });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BeemFlowError::config(format!("failed to bind {}: {}", addr, e)))?;

    tracing::info!(%addr, "http server listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| BeemFlowError::internal(format!("server error: {}", e)))?;

    Ok(())
}

// ----------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct StartRunRequest {
    flow_name: String,
    #[serde(default)]
    event: HashMap<String, Value>,
}

async fn start_run(
    State(state): State<AppState>,
    Json(req): Json<StartRunRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let path = flow_path(&state.config, &req.flow_name)?;
    let flow = crate::dsl::load_flow(path, HashMap::new())?;

    match state
        .engine
        .execute(&flow, req.event, CancellationToken::new())
        .await
    {
        Ok(result) => Ok(Json(json!({
            "run_id": result.run_id,
            "status": "SUCCEEDED",
            "outputs": result.outputs,
        }))),
        Err(e) if e.is_pause() => {
            let token = e.pause_token().unwrap_or_default().to_string();
            Ok(Json(json!({
                "run_id": state.engine.run_id_for_token(&token),
                "status": "WAITING",
                "token": token,
            })))
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_runs(
    State(state): State<AppState>,
) -> std::result::Result<Json<Vec<Run>>, ApiError> {
    Ok(Json(state.engine.list_runs().await?))
}

async fn get_run(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
) -> std::result::Result<Json<Run>, ApiError> {
    state
        .engine
        .get_run(id)
        .await?
        .map(Json)
        .ok_or_else(|| BeemFlowError::not_found("run", id.to_string()).into())
}

async fn delete_run(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
) -> std::result::Result<StatusCode, ApiError> {
    state.engine.delete_run(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_run(
    State(state): State<AppState>,
    UrlPath(token): UrlPath<String>,
    Json(payload): Json<Value>,
) -> std::result::Result<Json<Value>, ApiError> {
    let event = match payload {
        Value::Object(map) => map.into_iter().collect(),
        Value::Null => HashMap::new(),
        _ => {
            return Err(BeemFlowError::validation("resume payload must be a JSON object").into());
        }
    };

    match state
        .engine
        .resume(&token, event, CancellationToken::new())
        .await
    {
        Ok(result) => Ok(Json(json!({
            "run_id": result.run_id,
            "status": "SUCCEEDED",
            "outputs": result.outputs,
        }))),
        Err(e) if e.is_pause() => Ok(Json(json!({
            "status": "WAITING",
            "token": e.pause_token().unwrap_or_default(),
        }))),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    topic: String,
    #[serde(default)]
    payload: Value,
}

async fn publish_event(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> std::result::Result<StatusCode, ApiError> {
    state.engine.publish(&req.topic, req.payload).await?;
    Ok(StatusCode::ACCEPTED)
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

/// Resolve a flow name to a file under the flows directory
fn flow_path(config: &Config, flow_name: &str) -> std::result::Result<PathBuf, ApiError> {
    // A flow name is an identifier, never a path.
    if flow_name.contains('/') || flow_name.contains('\\') || flow_name.contains("..") {
        return Err(BeemFlowError::validation(format!("invalid flow name: {}", flow_name)).into());
    }

    let dir = PathBuf::from(config.flows_dir());
    let candidate = dir.join(format!(
        "{}{}",
        flow_name,
        crate::constants::FLOW_FILE_EXTENSION
    ));
    if candidate.exists() {
        return Ok(candidate);
    }

    let fallback = dir.join(format!("{}.yaml", flow_name));
    if fallback.exists() {
        return Ok(fallback);
    }

    Err(BeemFlowError::not_found("flow", flow_name).into())
}

/// Error wrapper mapping engine errors onto HTTP statuses
pub struct ApiError(BeemFlowError);

impl From<BeemFlowError> for ApiError {
    fn from(err: BeemFlowError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BeemFlowError::Validation(_) | BeemFlowError::Template(_) => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

#[cfg(test)]
mod http_test;
