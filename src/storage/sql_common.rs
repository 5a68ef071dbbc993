//! Shared helpers for the SQL storage backends
//!
//! Status string conversions and JSON column handling used by both the
//! SQLite and PostgreSQL implementations.

use crate::model::*;
use std::collections::HashMap;

// ============================================================================
// Status Conversions
// ============================================================================

#[inline]
pub fn parse_run_status(s: &str) -> RunStatus {
    match s {
        "PENDING" => RunStatus::Pending,
        "RUNNING" => RunStatus::Running,
        "WAITING" => RunStatus::Waiting,
        "SUCCEEDED" => RunStatus::Succeeded,
        "SKIPPED" => RunStatus::Skipped,
        _ => RunStatus::Failed,
    }
}

#[inline]
pub fn run_status_to_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "PENDING",
        RunStatus::Running => "RUNNING",
        RunStatus::Waiting => "WAITING",
        RunStatus::Succeeded => "SUCCEEDED",
        RunStatus::Failed => "FAILED",
        RunStatus::Skipped => "SKIPPED",
    }
}

#[inline]
pub fn parse_step_status(s: &str) -> StepStatus {
    match s {
        "PENDING" => StepStatus::Pending,
        "RUNNING" => StepStatus::Running,
        "WAITING" => StepStatus::Waiting,
        "SUCCEEDED" => StepStatus::Succeeded,
        "SKIPPED" => StepStatus::Skipped,
        _ => StepStatus::Failed,
    }
}

#[inline]
pub fn step_status_to_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "PENDING",
        StepStatus::Running => "RUNNING",
        StepStatus::Waiting => "WAITING",
        StepStatus::Succeeded => "SUCCEEDED",
        StepStatus::Failed => "FAILED",
        StepStatus::Skipped => "SKIPPED",
    }
}

// ============================================================================
// JSON Columns
// ============================================================================

/// Parse a map column stored as JSON text; empty/null text is an empty map
#[inline]
pub fn parse_map_from_text(text: &str) -> HashMap<String, serde_json::Value> {
    if text.is_empty() {
        return HashMap::new();
    }
    serde_json::from_str(text).unwrap_or_default()
}

/// Parse a map from a Postgres JSONB value
#[inline]
pub fn parse_map_from_jsonb(val: serde_json::Value) -> HashMap<String, serde_json::Value> {
    val.as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}
