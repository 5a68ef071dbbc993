//! Execution engine for BeemFlow workflows
//!
//! The engine owns the run lifecycle: it validates flows, creates runs,
//! drives the executor, persists continuations when a run pauses, and wakes
//! runs back up when a matching event or timer fires. All resume signals
//! funnel through one dispatcher task, and the atomic fetch-and-delete of
//! the continuation is the commit point that makes duplicate wake-ups
//! harmless.

pub mod context;
pub mod executor;

use crate::adapter::AdapterRegistry;
use crate::dsl::{Templater, Validator};
use crate::event::{EventBus, SubscriptionId};
use crate::model::{Run, RunStatus, StepPath, StepRun, StepStatus};
use crate::storage::Storage;
use crate::{BeemFlowError, Flow, Result};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use context::{ContextSnapshot, RunContext};
pub use executor::Executor;

/// Result of a flow execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub outputs: HashMap<String, Value>,
}

/// Serialized continuation for a paused run
///
/// Everything needed to resume after a process restart: the flow itself,
/// the index path of the paused step, the context snapshot, and the
/// subscription parameters (source + rendered match) so recovery can
/// reinstall the wake-up routes.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PausedRun {
    pub flow: Flow,
    pub step_path: StepPath,
    pub step_id: String,
    pub context: ContextSnapshot,
    pub outputs: HashMap<String, Value>,
    pub token: String,
    pub run_id: Uuid,
    /// User topic to listen on, when the pause came from await_event
    pub source: Option<String>,
    /// Rendered match criteria for the source subscription
    #[serde(rename = "match")]
    pub match_: HashMap<String, Value>,
    /// Unix timestamp of the wake deadline, when a timeout was set
    pub wake_at: Option<i64>,
}

/// Internal wake-up signal routed to the resume dispatcher
#[derive(Debug)]
pub struct ResumeSignal {
    pub token: String,
    pub payload: Value,
}

/// BeemFlow execution engine
///
/// Cheap to clone; all state is shared. Construct once via `Engine::new`
/// (or `Engine::from_config`) and call `close()` on shutdown to stop the
/// dispatcher and any pending wake timers.
#[derive(Clone)]
pub struct Engine {
    adapters: Arc<AdapterRegistry>,
    templater: Arc<Templater>,
    event_bus: Arc<dyn EventBus>,
    storage: Arc<dyn Storage>,
    subscriptions: Arc<DashMap<String, Vec<SubscriptionId>>>,
    token_runs: Arc<DashMap<String, Uuid>>,
    resume_tx: mpsc::UnboundedSender<ResumeSignal>,
    shutdown: CancellationToken,
    max_concurrent_tasks: usize,
}

impl Engine {
    /// Create a new engine with explicit dependencies
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        templater: Arc<Templater>,
        event_bus: Arc<dyn EventBus>,
        storage: Arc<dyn Storage>,
        max_concurrent_tasks: usize,
    ) -> Self {
        let (resume_tx, resume_rx) = mpsc::unbounded_channel();

        let engine = Self {
            adapters,
            templater,
            event_bus,
            storage,
            subscriptions: Arc::new(DashMap::new()),
            token_runs: Arc::new(DashMap::new()),
            resume_tx,
            shutdown: CancellationToken::new(),
            max_concurrent_tasks,
        };

        engine.spawn_resume_dispatcher(resume_rx);
        engine
    }

    /// Build an engine from configuration and recover persisted pauses
    pub async fn from_config(config: &crate::config::Config) -> Result<Self> {
        let storage = crate::storage::create_storage_from_config(&config.storage).await?;

        let adapters = Arc::new(AdapterRegistry::new());
        adapters.register(Arc::new(crate::adapter::CoreAdapter::new()));
        adapters.register(Arc::new(crate::adapter::HttpAdapter::new(
            crate::constants::HTTP_ADAPTER_ID.to_string(),
        )));

        let engine = Self::new(
            adapters,
            Arc::new(Templater::new()),
            Arc::new(crate::event::InProcEventBus::new()),
            storage,
            config.max_concurrent_tasks(),
        );

        engine.recover().await?;
        Ok(engine)
    }

    /// Execute a flow with event data
    ///
    /// Returns when the run reaches a terminal state, or with the
    /// `Pause` sentinel when it durably paused; the run record is then
    /// observable as WAITING.
    pub async fn execute(
        &self,
        flow: &Flow,
        event: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        // Malformed flows never create a run.
        Validator::validate(flow)?;

        let run_id = self.deterministic_run_id(&flow.name, &event);
        let vars = flow.vars.clone().unwrap_or_default();

        let run = Run {
            id: run_id,
            flow_name: flow.name.clone(),
            event: event.clone(),
            vars: vars.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            steps: None,
        };

        // The deterministic id includes a time bucket, so an identical
        // event within the same window is a duplicate and is suppressed.
        if !self.storage.try_insert_run(&run).await? {
            tracing::info!(flow = %flow.name, %run_id, "duplicate run suppressed");
            return Err(BeemFlowError::validation(format!(
                "Duplicate run detected for flow '{}' (run_id: {})",
                flow.name, run_id
            )));
        }

        let ctx = RunContext::new(event, vars);
        let executor = self.executor(cancel);
        let result = executor.execute_steps(flow, &ctx, run_id, None).await;

        let outputs = self.finalize(flow, &ctx, run, result).await?;
        Ok(ExecutionResult { run_id, outputs })
    }

    /// Resume a paused run with a payload
    ///
    /// The payload merges into the run context under the paused step's id;
    /// execution continues from the recorded step path. Unknown tokens
    /// return not-found and change no state.
    pub async fn resume(
        &self,
        token: &str,
        resume_event: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        self.resume_internal(token, resume_event, cancel).await
    }

    async fn resume_internal(
        &self,
        token: &str,
        resume_event: HashMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        // Commit point: exactly one resumer gets the continuation.
        let paused_json = self
            .storage
            .fetch_and_delete_paused_run(token)
            .await?
            .ok_or_else(|| BeemFlowError::not_found("paused run", token))?;

        let paused: PausedRun = serde_json::from_value(paused_json)?;

        // A continuation whose path no longer resolves cannot be walked.
        if executor::step_at_path(&paused.flow, &paused.step_path).is_none() {
            return Err(BeemFlowError::internal(format!(
                "continuation path for token '{}' does not resolve",
                token
            )));
        }

        let _ = self.storage.resolve_wait(token).await;
        self.remove_subscriptions(token).await;
        self.token_runs.insert(token.to_string(), paused.run_id);

        tracing::info!(%token, run_id = %paused.run_id, "resuming run");

        let ctx = RunContext::restore(paused.context.clone());
        ctx.set_output(
            paused.step_id.clone(),
            Value::Object(resume_event.clone().into_iter().collect()),
        );

        // Finalize the awaited step's record with the merged payload.
        self.storage
            .save_step(&StepRun {
                id: Uuid::new_v4(),
                run_id: paused.run_id,
                step_name: paused.step_id.clone(),
                status: StepStatus::Succeeded,
                started_at: Utc::now(),
                ended_at: Some(Utc::now()),
                error: None,
                outputs: Some(resume_event),
            })
            .await?;

        let mut run = self
            .storage
            .get_run(paused.run_id)
            .await?
            .ok_or_else(|| BeemFlowError::not_found("run", paused.run_id.to_string()))?;
        run.status = RunStatus::Running;
        run.ended_at = None;
        self.storage.save_run(&run).await?;

        let executor = self.executor(cancel);
        let result = executor
            .execute_steps(&paused.flow, &ctx, paused.run_id, Some(paused.step_path.clone()))
            .await;

        let outputs = self.finalize(&paused.flow, &ctx, run, result).await?;
        Ok(ExecutionResult {
            run_id: paused.run_id,
            outputs,
        })
    }

    /// Terminal outputs of a previously paused run, until it is deleted
    pub async fn get_completed_outputs(
        &self,
        token: &str,
    ) -> Result<Option<HashMap<String, Value>>> {
        let Some(run_id) = self.token_runs.get(token).map(|r| *r.value()) else {
            return Ok(None);
        };
        let Some(run) = self.storage.get_run(run_id).await? else {
            return Ok(None);
        };
        if !run.status.is_terminal() {
            return Ok(None);
        }

        let mut outputs = HashMap::new();
        for step in self.storage.get_steps(run_id).await? {
            if step.status == StepStatus::Succeeded
                && let Some(step_outputs) = step.outputs
            {
                outputs.insert(
                    step.step_name,
                    Value::Object(step_outputs.into_iter().collect()),
                );
            }
        }
        Ok(Some(outputs))
    }

    /// Run id associated with a pause token, if the engine knows it
    pub fn run_id_for_token(&self, token: &str) -> Option<Uuid> {
        self.token_runs.get(token).map(|entry| *entry.value())
    }

    /// Publish an event to the bus (passthrough for flows and callers)
    pub async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        self.event_bus.publish(topic, payload).await
    }

    /// List all runs
    pub async fn list_runs(&self) -> Result<Vec<Run>> {
        self.storage.list_runs().await
    }

    /// Get a run with its step records attached
    pub async fn get_run(&self, id: Uuid) -> Result<Option<Run>> {
        let Some(mut run) = self.storage.get_run(id).await? else {
            return Ok(None);
        };
        run.steps = Some(self.storage.get_steps(id).await?);
        Ok(Some(run))
    }

    /// Delete a run, including any pause state it left behind
    pub async fn delete_run(&self, id: Uuid) -> Result<()> {
        for token in self.tokens_for_run(id).await {
            let _ = self.storage.delete_paused_run(&token).await;
            let _ = self.storage.resolve_wait(&token).await;
            self.remove_subscriptions(&token).await;
            self.token_runs.remove(&token);
        }

        self.storage.delete_run(id).await
    }

    /// Reinstall subscriptions and timers for persisted continuations
    ///
    /// Called once at startup. Each recovered pause gets its resume route
    /// and, when a source was recorded, its event-match subscription back;
    /// expired deadlines fire immediately.
    pub async fn recover(&self) -> Result<()> {
        let paused_runs = self.storage.load_paused_runs().await?;
        let count = paused_runs.len();

        for (token, data) in paused_runs {
            let paused: PausedRun = match serde_json::from_value(data) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(%token, error = %e, "skipping unreadable continuation");
                    continue;
                }
            };

            self.token_runs.insert(token.clone(), paused.run_id);

            install_pause_subscriptions(
                &self.event_bus,
                &self.subscriptions,
                &self.resume_tx,
                &token,
                paused.source.as_deref(),
                &paused.match_,
            )
            .await?;

            if let Some(wake_at) = paused.wake_at {
                schedule_wake(self.event_bus.clone(), self.shutdown.clone(), &token, wake_at);
            }
        }

        if count > 0 {
            tracing::info!(count, "recovered paused runs");
        }
        Ok(())
    }

    /// Release background tasks
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn executor(&self, cancel: CancellationToken) -> Executor {
        Executor::new(
            self.adapters.clone(),
            self.templater.clone(),
            self.event_bus.clone(),
            self.storage.clone(),
            self.resume_tx.clone(),
            self.subscriptions.clone(),
            self.token_runs.clone(),
            self.shutdown.clone(),
            cancel,
            self.max_concurrent_tasks,
        )
    }

    /// Record the run's final status and surface the walk's outcome
    async fn finalize(
        &self,
        flow: &Flow,
        ctx: &RunContext,
        mut run: Run,
        result: Result<()>,
    ) -> Result<HashMap<String, Value>> {
        match result {
            Ok(()) => {
                run.status = RunStatus::Succeeded;
                run.ended_at = Some(Utc::now());
                self.storage.save_run(&run).await?;
                Ok(ctx.snapshot().outputs)
            }
            Err(e) if e.is_pause() => {
                // A matching event may already have raced us through the
                // dispatcher; once the continuation is gone the resume path
                // owns the run's status.
                let token = e.pause_token().unwrap_or_default();
                if self.storage.load_paused_runs().await?.contains_key(token) {
                    run.status = RunStatus::Waiting;
                    run.ended_at = None;
                    self.storage.save_run(&run).await?;
                }
                Err(e)
            }
            Err(e) => {
                run.status = RunStatus::Failed;
                run.ended_at = Some(Utc::now());
                self.storage.save_run(&run).await?;
                self.run_catch(flow, ctx, run.id, &e).await;
                Err(e)
            }
        }
    }

    /// Run the matching catch handler, if any, with error context
    async fn run_catch(&self, flow: &Flow, ctx: &RunContext, run_id: Uuid, err: &BeemFlowError) {
        let Some(catch) = &flow.catch else {
            return;
        };

        let failed_step = match err {
            BeemFlowError::StepExecution { step_id, .. } => Some(step_id.as_str()),
            _ => None,
        };

        let handler = failed_step
            .and_then(|id| catch.get(id))
            .or_else(|| catch.get(crate::constants::CATCH_WILDCARD));

        let Some(handler) = handler else {
            return;
        };

        let catch_ctx = ctx.fork();
        catch_ctx.set_var(
            crate::constants::TEMPLATE_FIELD_ERROR.to_string(),
            serde_json::json!({
                "step": failed_step.unwrap_or_default(),
                "message": err.to_string(),
            }),
        );

        let executor = self.executor(CancellationToken::new());
        if let Err(catch_err) = executor
            .run_step(flow, handler, &catch_ctx, run_id, Vec::new(), None)
            .await
        {
            tracing::error!(
                step = %handler.id,
                error = %catch_err,
                "catch handler failed"
            );
        }
    }

    /// Tokens whose pause state belongs to a run
    async fn tokens_for_run(&self, run_id: Uuid) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .token_runs
            .iter()
            .filter(|entry| *entry.value() == run_id)
            .map(|entry| entry.key().clone())
            .collect();

        // The in-memory index is empty after a restart; fall back to the
        // persisted continuations.
        if tokens.is_empty()
            && let Ok(paused_runs) = self.storage.load_paused_runs().await
        {
            for (token, data) in paused_runs {
                if serde_json::from_value::<PausedRun>(data)
                    .map(|p| p.run_id == run_id)
                    .unwrap_or(false)
                {
                    tokens.push(token);
                }
            }
        }

        tokens
    }

    async fn remove_subscriptions(&self, token: &str) {
        let Some((_, ids)) = self.subscriptions.remove(token) else {
            return;
        };
        for id in ids {
            if let Err(e) = self.event_bus.unsubscribe(id).await {
                tracing::warn!(%token, error = %e, "failed to remove subscription");
            }
        }
    }

    fn spawn_resume_dispatcher(&self, mut resume_rx: mpsc::UnboundedReceiver<ResumeSignal>) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    _ = engine.shutdown.cancelled() => break,
                    signal = resume_rx.recv() => match signal {
                        Some(signal) => signal,
                        None => break,
                    },
                };

                let payload = match signal.payload {
                    Value::Object(map) => map.into_iter().collect(),
                    _ => HashMap::new(),
                };

                match engine
                    .resume_internal(&signal.token, payload, CancellationToken::new())
                    .await
                {
                    Ok(_) => {}
                    Err(e) if e.is_pause() => {}
                    Err(e) if e.is_not_found() => {
                        // Duplicate wake-up past the commit point.
                        tracing::debug!(token = %signal.token, "stale resume signal ignored");
                    }
                    Err(e) => {
                        tracing::error!(token = %signal.token, error = %e, "resume failed");
                    }
                }
            }
        });
    }

    /// Deterministic run id: flow name + minute bucket + sorted event JSON
    fn deterministic_run_id(&self, flow_name: &str, event: &HashMap<String, Value>) -> Uuid {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(flow_name.as_bytes());

        let time_bucket = Utc::now().timestamp() / 60 * 60;
        hasher.update(time_bucket.to_string().as_bytes());

        let mut keys: Vec<&String> = event.keys().collect();
        keys.sort();
        for key in keys {
            hasher.update(key.as_bytes());
            if let Ok(json) = serde_json::to_string(&event[key]) {
                hasher.update(json.as_bytes());
            }
        }

        Uuid::new_v5(&Uuid::NAMESPACE_DNS, &hasher.finalize())
    }

    /// Create an engine for testing with in-memory dependencies
    pub fn for_testing() -> Self {
        let adapters = Arc::new(AdapterRegistry::new());
        adapters.register(Arc::new(crate::adapter::CoreAdapter::new()));
        adapters.register(Arc::new(crate::adapter::HttpAdapter::new(
            crate::constants::HTTP_ADAPTER_ID.to_string(),
        )));

        Self::new(
            adapters,
            Arc::new(Templater::new()),
            Arc::new(crate::event::InProcEventBus::new()),
            Arc::new(crate::storage::MemoryStorage::new()),
            crate::constants::DEFAULT_MAX_CONCURRENT_TASKS,
        )
    }

    /// Adapter registry accessor (for registering custom adapters)
    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    /// Storage accessor (for testing only)
    #[cfg(test)]
    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }
}

/// Install the wake-up routes for a pause
///
/// Two subscriptions: the internal `resume:<token>` topic, and (for
/// await_event) the user source topic filtered by deep equality of the
/// rendered match values against the incoming payload. Both feed the
/// dispatcher; the continuation is already durable by the time they exist.
pub(crate) async fn install_pause_subscriptions(
    event_bus: &Arc<dyn EventBus>,
    subscriptions: &Arc<DashMap<String, Vec<SubscriptionId>>>,
    resume_tx: &mpsc::UnboundedSender<ResumeSignal>,
    token: &str,
    source: Option<&str>,
    match_: &HashMap<String, Value>,
) -> Result<()> {
    let mut ids = Vec::new();

    let resume_topic = format!("{}{}", crate::constants::EVENT_TOPIC_RESUME_PREFIX, token);
    let tx = resume_tx.clone();
    let signal_token = token.to_string();
    ids.push(
        event_bus
            .subscribe(
                &resume_topic,
                Arc::new(move |payload| {
                    let _ = tx.send(ResumeSignal {
                        token: signal_token.clone(),
                        payload,
                    });
                }),
            )
            .await?,
    );

    if let Some(source) = source {
        let tx = resume_tx.clone();
        let signal_token = token.to_string();
        let criteria = match_.clone();
        ids.push(
            event_bus
                .subscribe(
                    source,
                    Arc::new(move |payload| {
                        if matches_event(&payload, &criteria) {
                            let _ = tx.send(ResumeSignal {
                                token: signal_token.clone(),
                                payload,
                            });
                        }
                    }),
                )
                .await?,
        );
    }

    subscriptions.insert(token.to_string(), ids);
    Ok(())
}

/// Deep equality of every match value against the incoming payload
fn matches_event(payload: &Value, criteria: &HashMap<String, Value>) -> bool {
    criteria
        .iter()
        .all(|(key, expected)| payload.get(key) == Some(expected))
}

/// Fire `resume:<token>` with an empty payload at the wake deadline
pub(crate) fn schedule_wake(
    event_bus: Arc<dyn EventBus>,
    shutdown: CancellationToken,
    token: &str,
    wake_at: i64,
) {
    let token = token.to_string();
    tokio::spawn(async move {
        let delay = (wake_at - Utc::now().timestamp()).max(0) as u64;
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(std::time::Duration::from_secs(delay)) => {}
        }

        tracing::debug!(%token, "wait deadline reached");
        let topic = format!("{}{}", crate::constants::EVENT_TOPIC_RESUME_PREFIX, token);
        if let Err(e) = event_bus
            .publish(&topic, Value::Object(serde_json::Map::new()))
            .await
        {
            tracing::error!(%token, error = %e, "failed to publish wake event");
        }
    });
}
