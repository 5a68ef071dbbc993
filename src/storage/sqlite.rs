//! SQLite storage implementation
//!
//! Persistent embedded storage for runs, steps, waits, and paused
//! continuations. JSON columns are stored as TEXT.

use crate::model::*;
use crate::storage::{sql_common::*, Storage, WaitRegistration};
use crate::{BeemFlowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// SQLite storage backend
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage
    ///
    /// # Arguments
    /// * `dsn` - Database path (e.g. ".beemflow/flow.db" or ":memory:")
    pub async fn new(dsn: &str) -> Result<Self> {
        let connection_string = if dsn.starts_with("sqlite:") {
            if dsn.contains('?') {
                dsn.to_string()
            } else {
                format!("{}?mode=rwc", dsn)
            }
        } else {
            format!("sqlite:{}?mode=rwc", dsn)
        };

        let file_path = dsn.strip_prefix("sqlite:").unwrap_or(dsn);

        // Path traversal is never a valid database location
        if file_path.contains("..") {
            return Err(BeemFlowError::config(
                "Database path cannot contain '..' (path traversal not allowed)",
            ));
        }

        if file_path != ":memory:"
            && let Some(parent) = Path::new(file_path).parent()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePool::connect(&connection_string)
            .await
            .map_err(|e| BeemFlowError::storage(format!("Failed to connect to SQLite: {}", e)))?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations/sqlite")
            .run(&pool)
            .await
            .map_err(|e| BeemFlowError::storage(format!("Failed to run migrations: {}", e)))?;

        Ok(Self { pool })
    }

    fn parse_run(row: &SqliteRow) -> Result<Run> {
        Ok(Run {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            flow_name: row.try_get("flow_name")?,
            event: parse_map_from_text(&row.try_get::<String, _>("event")?),
            vars: parse_map_from_text(&row.try_get::<String, _>("vars")?),
            status: parse_run_status(&row.try_get::<String, _>("status")?),
            started_at: DateTime::from_timestamp(row.try_get("started_at")?, 0)
                .unwrap_or_else(Utc::now),
            ended_at: row
                .try_get::<Option<i64>, _>("ended_at")?
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            steps: None,
        })
    }

    fn parse_step(row: &SqliteRow) -> Result<StepRun> {
        let outputs = row
            .try_get::<Option<String>, _>("outputs")?
            .map(|text| parse_map_from_text(&text));

        Ok(StepRun {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            run_id: Uuid::parse_str(&row.try_get::<String, _>("run_id")?)?,
            step_name: row.try_get("step_name")?,
            status: parse_step_status(&row.try_get::<String, _>("status")?),
            started_at: DateTime::from_timestamp(row.try_get("started_at")?, 0)
                .unwrap_or_else(Utc::now),
            ended_at: row
                .try_get::<Option<i64>, _>("ended_at")?
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            error: row.try_get("error")?,
            outputs,
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (id, flow_name, event, vars, status, started_at, ended_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                flow_name = excluded.flow_name,
                event = excluded.event,
                vars = excluded.vars,
                status = excluded.status,
                started_at = excluded.started_at,
                ended_at = excluded.ended_at",
        )
        .bind(run.id.to_string())
        .bind(&run.flow_name)
        .bind(serde_json::to_string(&run.event)?)
        .bind(serde_json::to_string(&run.vars)?)
        .bind(run_status_to_str(run.status))
        .bind(run.started_at.timestamp())
        .bind(run.ended_at.map(|dt| dt.timestamp()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT id, flow_name, event, vars, status, started_at, ended_at
             FROM runs WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::parse_run(&row)).transpose()
    }

    async fn list_runs(&self) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT id, flow_name, event, vars, status, started_at, ended_at
             FROM runs
             ORDER BY started_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_run).collect()
    }

    async fn delete_run(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM steps WHERE run_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM runs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn try_insert_run(&self, run: &Run) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO runs (id, flow_name, event, vars, status, started_at, ended_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(run.id.to_string())
        .bind(&run.flow_name)
        .bind(serde_json::to_string(&run.event)?)
        .bind(serde_json::to_string(&run.vars)?)
        .bind(run_status_to_str(run.status))
        .bind(run.started_at.timestamp())
        .bind(run.ended_at.map(|dt| dt.timestamp()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_latest_run_by_flow_name(&self, name: &str) -> Result<Option<Run>> {
        let row = sqlx::query(
            "SELECT id, flow_name, event, vars, status, started_at, ended_at
             FROM runs
             WHERE flow_name = ?
             ORDER BY started_at DESC
             LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::parse_run(&row)).transpose()
    }

    async fn save_step(&self, step: &StepRun) -> Result<()> {
        let outputs = step
            .outputs
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO steps (id, run_id, step_name, status, started_at, ended_at, outputs, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                ended_at = excluded.ended_at,
                outputs = excluded.outputs,
                error = excluded.error",
        )
        .bind(step.id.to_string())
        .bind(step.run_id.to_string())
        .bind(&step.step_name)
        .bind(step_status_to_str(step.status))
        .bind(step.started_at.timestamp())
        .bind(step.ended_at.map(|dt| dt.timestamp()))
        .bind(outputs)
        .bind(&step.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_steps(&self, run_id: Uuid) -> Result<Vec<StepRun>> {
        let rows = sqlx::query(
            "SELECT id, run_id, step_name, status, started_at, ended_at, outputs, error
             FROM steps
             WHERE run_id = ?
             ORDER BY rowid",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_step).collect()
    }

    async fn register_wait(&self, token: &str, wake_at: Option<i64>) -> Result<()> {
        sqlx::query(
            "INSERT INTO waits (token, wake_at) VALUES (?, ?)
             ON CONFLICT(token) DO UPDATE SET wake_at = excluded.wake_at",
        )
        .bind(token)
        .bind(wake_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn resolve_wait(&self, token: &str) -> Result<Option<WaitRegistration>> {
        let row = sqlx::query("DELETE FROM waits WHERE token = ? RETURNING token, wake_at")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(WaitRegistration {
                token: row.try_get("token")?,
                wake_at: row.try_get("wake_at")?,
            })
        })
        .transpose()
    }

    async fn save_paused_run(&self, token: &str, data: serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO paused_runs (token, data) VALUES (?, ?)
             ON CONFLICT(token) DO UPDATE SET data = excluded.data",
        )
        .bind(token)
        .bind(serde_json::to_string(&data)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_paused_runs(&self) -> Result<HashMap<String, serde_json::Value>> {
        let rows = sqlx::query("SELECT token, data FROM paused_runs")
            .fetch_all(&self.pool)
            .await?;

        let mut paused = HashMap::new();
        for row in rows {
            let token: String = row.try_get("token")?;
            let data: String = row.try_get("data")?;
            paused.insert(token, serde_json::from_str(&data)?);
        }
        Ok(paused)
    }

    async fn delete_paused_run(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM paused_runs WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch_and_delete_paused_run(&self, token: &str) -> Result<Option<serde_json::Value>> {
        // DELETE .. RETURNING makes the fetch-and-delete a single atomic
        // statement: only one resumer can observe the row.
        let row = sqlx::query("DELETE FROM paused_runs WHERE token = ? RETURNING data")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let data: String = row.try_get("data")?;
            Ok(serde_json::from_str(&data)?)
        })
        .transpose()
    }
}
