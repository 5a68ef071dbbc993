//! Step executor
//!
//! Walks a flow's step lists, honoring dependency order, conditionals,
//! foreach iteration, parallel fan-out, retries, and durable pauses. A
//! pause records an index path into the nested step lists; resumption walks
//! the same deterministic schedule with a cursor that skips everything
//! completed before the pause.

use super::{install_pause_subscriptions, schedule_wake, PausedRun, ResumeSignal};
use crate::adapter::{AdapterRegistry, ExecutionContext};
use crate::dsl::{DependencyAnalyzer, Templater};
use crate::engine::context::RunContext;
use crate::event::{EventBus, SubscriptionId};
use crate::model::{PathSeg, RetrySpec, Step, StepKind, StepPath, StepStatus, WaitSpec};
use crate::storage::Storage;
use crate::{BeemFlowError, Flow, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Which kind of sibling list is being walked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListScope {
    /// A flow-level or parallel `steps:` list
    Steps,
    /// A foreach `do:` body
    Do,
}

impl ListScope {
    fn seg(self, pos: usize) -> PathSeg {
        match self {
            ListScope::Steps => PathSeg::Steps(pos),
            ListScope::Do => PathSeg::Do(pos),
        }
    }

    fn pos_of(self, seg: PathSeg) -> Option<usize> {
        match (self, seg) {
            (ListScope::Steps, PathSeg::Steps(i)) | (ListScope::Do, PathSeg::Do(i)) => Some(i),
            _ => None,
        }
    }
}

/// Step executor for one `execute`/`resume` call
#[derive(Clone)]
pub struct Executor {
    adapters: Arc<AdapterRegistry>,
    templater: Arc<Templater>,
    event_bus: Arc<dyn EventBus>,
    storage: Arc<dyn Storage>,
    resume_tx: mpsc::UnboundedSender<ResumeSignal>,
    subscriptions: Arc<DashMap<String, Vec<SubscriptionId>>>,
    token_runs: Arc<DashMap<String, Uuid>>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        templater: Arc<Templater>,
        event_bus: Arc<dyn EventBus>,
        storage: Arc<dyn Storage>,
        resume_tx: mpsc::UnboundedSender<ResumeSignal>,
        subscriptions: Arc<DashMap<String, Vec<SubscriptionId>>>,
        token_runs: Arc<DashMap<String, Uuid>>,
        shutdown: CancellationToken,
        cancel: CancellationToken,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            adapters,
            templater,
            event_bus,
            storage,
            resume_tx,
            subscriptions,
            token_runs,
            shutdown,
            cancel,
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
        }
    }

    /// Execute a flow's steps, optionally resuming from a recorded path
    ///
    /// With a cursor, every step scheduled before the paused one is treated
    /// as completed (its outputs are already in the context), the paused
    /// step itself is skipped (its output was merged by the resume), and
    /// the walk continues after it.
    pub async fn execute_steps(
        &self,
        flow: &Flow,
        ctx: &RunContext,
        run_id: Uuid,
        cursor: Option<StepPath>,
    ) -> Result<()> {
        self.execute_list(
            flow,
            &flow.steps,
            ctx,
            run_id,
            Vec::new(),
            ListScope::Steps,
            cursor,
        )
        .await
    }

    /// Walk one sibling list in dependency order
    #[allow(clippy::too_many_arguments)]
    fn execute_list<'a>(
        &'a self,
        flow: &'a Flow,
        steps: &'a [Step],
        ctx: &'a RunContext,
        run_id: Uuid,
        base: StepPath,
        scope: ListScope,
        cursor: Option<StepPath>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let order = DependencyAnalyzer::execution_order(steps)?;

            let mut resume_at: Option<usize> = None;
            let mut descend: Option<StepPath> = None;
            if let Some(cur) = &cursor {
                let head = cur
                    .first()
                    .copied()
                    .and_then(|seg| scope.pos_of(seg))
                    .ok_or_else(|| {
                        BeemFlowError::internal("corrupt continuation path")
                    })?;
                let oi = order.iter().position(|&i| i == head).ok_or_else(|| {
                    BeemFlowError::internal("continuation path points outside schedule")
                })?;
                resume_at = Some(oi);
                if cur.len() > 1 {
                    descend = Some(cur[1..].to_vec());
                }
            }

            for (oi, &si) in order.iter().enumerate() {
                if let Some(r) = resume_at {
                    if oi < r {
                        // Completed before the pause; outputs already in ctx.
                        continue;
                    }
                    if oi == r {
                        resume_at = None;
                        if let Some(tail) = descend.take() {
                            // The pause is nested inside this foreach step.
                            let mut path = base.clone();
                            path.push(scope.seg(si));
                            self.run_step(flow, &steps[si], ctx, run_id, path, Some(tail))
                                .await?;
                        }
                        // Otherwise this is the paused step itself: its
                        // resume payload was merged already, nothing to run.
                        continue;
                    }
                }

                let mut path = base.clone();
                path.push(scope.seg(si));
                self.run_step(flow, &steps[si], ctx, run_id, path, None).await?;
            }

            Ok(())
        })
    }

    /// Execute one step (recursive through foreach bodies)
    pub(crate) fn run_step<'a>(
        &'a self,
        flow: &'a Flow,
        step: &'a Step,
        ctx: &'a RunContext,
        run_id: Uuid,
        path: StepPath,
        cursor: Option<StepPath>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(BeemFlowError::Cancelled);
            }

            let started = Utc::now();
            let step_id = self.effective_step_id(step, ctx)?;

            // A resumed step's predicate already held before the pause.
            if cursor.is_none()
                && let Some(condition) = &step.condition
                && !self.evaluate_condition(condition, ctx)?
            {
                tracing::debug!(step = %step_id, %condition, "skipping step, condition not met");
                self.record_step(run_id, &step_id, StepStatus::Skipped, started, None, None)
                    .await?;
                return Ok(());
            }

            match &step.kind {
                StepKind::Call { use_, with, retry } => {
                    self.execute_call(&step_id, use_, with, retry.as_ref(), ctx, run_id, started)
                        .await
                }
                StepKind::Foreach {
                    expr,
                    bind,
                    parallel,
                    body,
                } => {
                    self.execute_foreach(
                        flow, step, &step_id, expr, bind, *parallel, body, ctx, run_id, path,
                        cursor, started,
                    )
                    .await
                }
                StepKind::Parallel { steps } => {
                    self.execute_parallel(flow, &step_id, steps, ctx, run_id, path, started)
                        .await
                }
                StepKind::AwaitEvent(spec) => {
                    let rendered = self.render_await_spec(spec, ctx)?;
                    self.pause_run(
                        flow, &step_id, ctx, run_id, path, started, rendered.0, rendered.1,
                        rendered.2,
                    )
                    .await
                }
                StepKind::Wait(spec) => {
                    self.execute_wait(flow, &step_id, spec, ctx, run_id, path, started)
                        .await
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Adapter calls
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn execute_call(
        &self,
        step_id: &str,
        use_: &str,
        with: &HashMap<String, Value>,
        retry: Option<&RetrySpec>,
        ctx: &RunContext,
        run_id: Uuid,
        started: DateTime<Utc>,
    ) -> Result<()> {
        let template_data = ctx.template_data();

        let rendered_inputs: Result<HashMap<String, Value>> = with
            .iter()
            .map(|(k, v)| {
                self.render_value(v, &template_data)
                    .map(|rendered| (k.clone(), rendered))
            })
            .collect();

        let mut inputs = match rendered_inputs {
            Ok(inputs) => inputs,
            Err(e) => {
                let error = e.to_string();
                self.record_step(
                    run_id,
                    step_id,
                    StepStatus::Failed,
                    started,
                    Some(error),
                    None,
                )
                .await?;
                return Err(self.step_failure(step_id, e));
            }
        };

        if use_.starts_with(crate::constants::ADAPTER_PREFIX_CORE) {
            inputs.insert(
                crate::constants::PARAM_SPECIAL_USE.to_string(),
                Value::String(use_.to_string()),
            );
        }

        let adapter = self.adapters.resolve(use_)?;
        let exec_ctx = ExecutionContext::new(self.cancel.clone());

        let attempts = retry.map(|r| r.attempts).unwrap_or(1).max(1);
        let base_delay = retry.map(|r| r.delay_sec).unwrap_or(0);

        let mut last_error = None;
        for attempt in 1..=attempts {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(BeemFlowError::Cancelled),
                result = adapter.execute(inputs.clone(), &exec_ctx) => result,
            };

            match result {
                Ok(outputs) => {
                    if attempt > 1 {
                        tracing::info!(step = %step_id, attempt, "step succeeded after retries");
                    }
                    ctx.set_output(
                        step_id.to_string(),
                        Value::Object(outputs.clone().into_iter().collect()),
                    );
                    self.record_step(
                        run_id,
                        step_id,
                        StepStatus::Succeeded,
                        started,
                        None,
                        Some(outputs),
                    )
                    .await?;
                    return Ok(());
                }
                Err(BeemFlowError::Cancelled) => return Err(BeemFlowError::Cancelled),
                Err(e) => {
                    tracing::warn!(step = %step_id, attempt, error = %e, "step attempt failed");
                    last_error = Some(e);

                    if attempt < attempts {
                        let delay = Self::retry_delay(attempt, base_delay);
                        if delay > 0 {
                            tokio::select! {
                                biased;
                                _ = self.cancel.cancelled() => return Err(BeemFlowError::Cancelled),
                                _ = tokio::time::sleep(std::time::Duration::from_secs(delay)) => {}
                            }
                        }
                    }
                }
            }
        }

        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "adapter call failed".to_string());
        self.record_step(
            run_id,
            step_id,
            StepStatus::Failed,
            started,
            Some(error.clone()),
            None,
        )
        .await?;

        Err(BeemFlowError::step_execution(step_id, error.as_str()))
    }

    /// Exponential backoff: base * 2^(attempt-1), capped
    fn retry_delay(attempt: u32, base_delay: u64) -> u64 {
        base_delay
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(crate::constants::MAX_RETRY_DELAY_SEC)
    }

    // ------------------------------------------------------------------
    // Foreach
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn execute_foreach(
        &self,
        flow: &Flow,
        step: &Step,
        step_id: &str,
        expr: &str,
        bind: &str,
        parallel: bool,
        body: &[Step],
        ctx: &RunContext,
        run_id: Uuid,
        path: StepPath,
        cursor: Option<StepPath>,
        started: DateTime<Utc>,
    ) -> Result<()> {
        let template_data = ctx.template_data();
        let list_val = self
            .templater
            .evaluate(expr, &template_data)
            .map_err(|e| self.step_failure(step_id, e))?;

        let items = list_val.as_array().cloned().ok_or_else(|| {
            BeemFlowError::validation(format!(
                "foreach expression in step '{}' did not evaluate to an array: {:?}",
                step_id, list_val
            ))
        })?;

        if items.is_empty() {
            let outputs = Self::foreach_outputs(Vec::new());
            ctx.set_output(step_id.to_string(), outputs.clone());
            self.record_step(
                run_id,
                step_id,
                StepStatus::Succeeded,
                started,
                None,
                Some(Self::as_map(outputs)),
            )
            .await?;
            return Ok(());
        }

        // Resume bookkeeping: which iteration, and where inside its body.
        let mut start_iter = 0;
        let mut body_cursor: Option<StepPath> = None;
        if let Some(cur) = cursor {
            match cur.first() {
                Some(PathSeg::Iter(k)) => {
                    start_iter = *k;
                    if cur.len() > 1 {
                        body_cursor = Some(cur[1..].to_vec());
                    }
                }
                _ => return Err(BeemFlowError::internal("corrupt foreach continuation path")),
            }
        }

        // Accumulated per-iteration outputs survive a pause through the
        // context snapshot.
        let mut acc: Vec<Value> = ctx
            .get_output(step_id)
            .and_then(|v| v.get("results").and_then(Value::as_array).cloned())
            .unwrap_or_default();
        acc.truncate(start_iter);

        let pausable = step.can_pause();
        if parallel && body_cursor.is_none() && !pausable {
            acc = self
                .foreach_parallel(flow, bind, body, &items, ctx, run_id, &path)
                .await?;
        } else {
            if parallel && pausable {
                tracing::debug!(step = %step_id, "foreach contains pause steps, iterating sequentially");
            }
            for (idx, item) in items.iter().enumerate().skip(start_iter) {
                ctx.set_var(bind.to_string(), item.clone());
                ctx.set_var(format!("{}_index", bind), Value::Number(idx.into()));

                let mut iter_path = path.clone();
                iter_path.push(PathSeg::Iter(idx));

                let iteration_cursor = if idx == start_iter {
                    body_cursor.take()
                } else {
                    None
                };

                self.execute_list(
                    flow,
                    body,
                    ctx,
                    run_id,
                    iter_path,
                    ListScope::Do,
                    iteration_cursor,
                )
                .await?;

                acc.push(self.iteration_outputs(body, ctx)?);
                // Keep progress visible in the context so a later pause
                // snapshots partial results.
                ctx.set_output(step_id.to_string(), Self::foreach_outputs(acc.clone()));
            }
        }

        let outputs = Self::foreach_outputs(acc);
        ctx.set_output(step_id.to_string(), outputs.clone());
        self.record_step(
            run_id,
            step_id,
            StepStatus::Succeeded,
            started,
            None,
            Some(Self::as_map(outputs)),
        )
        .await?;

        Ok(())
    }

    /// Run foreach iterations concurrently on forked contexts
    async fn foreach_parallel(
        &self,
        flow: &Flow,
        bind: &str,
        body: &[Step],
        items: &[Value],
        ctx: &RunContext,
        run_id: Uuid,
        path: &StepPath,
    ) -> Result<Vec<Value>> {
        let flow = Arc::new(flow.clone());
        let body: Arc<[Step]> = body.to_vec().into();
        let mut join_set = tokio::task::JoinSet::new();

        for (idx, item) in items.iter().enumerate() {
            let exec = self.clone();
            let flow = flow.clone();
            let body = body.clone();
            let item = item.clone();
            let bind = bind.to_string();
            let iter_ctx = ctx.fork();
            let mut iter_path = path.clone();
            iter_path.push(PathSeg::Iter(idx));
            let semaphore = self.semaphore.clone();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| BeemFlowError::Cancelled)?;

                iter_ctx.set_var(bind.clone(), item);
                iter_ctx.set_var(format!("{}_index", bind), Value::Number(idx.into()));

                exec.execute_list(
                    &flow,
                    &body,
                    &iter_ctx,
                    run_id,
                    iter_path,
                    ListScope::Do,
                    None,
                )
                .await?;

                let iteration = exec.iteration_outputs(&body, &iter_ctx)?;
                Ok::<_, BeemFlowError>((idx, iteration, iter_ctx.snapshot().outputs))
            });
        }

        let mut indexed: Vec<(usize, Value)> = Vec::with_capacity(items.len());
        while let Some(joined) = join_set.join_next().await {
            let (idx, iteration, outputs) = joined
                .map_err(|e| BeemFlowError::adapter(format!("foreach task failed: {}", e)))??;
            ctx.merge_outputs(outputs);
            indexed.push((idx, iteration));
        }

        indexed.sort_by_key(|(idx, _)| *idx);
        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }

    /// Collect one iteration's body outputs keyed by (rendered) step id
    fn iteration_outputs(&self, body: &[Step], ctx: &RunContext) -> Result<Value> {
        let mut map = serde_json::Map::new();
        for step in body {
            let id = self.effective_step_id(step, ctx)?;
            if let Some(output) = ctx.get_output(&id) {
                map.insert(id, output);
            }
        }
        Ok(Value::Object(map))
    }

    fn foreach_outputs(results: Vec<Value>) -> Value {
        let count = results.len();
        serde_json::json!({ "results": results, "count": count })
    }

    fn as_map(value: Value) -> HashMap<String, Value> {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            other => [("value".to_string(), other)].into_iter().collect(),
        }
    }

    // ------------------------------------------------------------------
    // Parallel blocks
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn execute_parallel(
        &self,
        flow: &Flow,
        step_id: &str,
        children: &[Step],
        ctx: &RunContext,
        run_id: Uuid,
        path: StepPath,
        started: DateTime<Utc>,
    ) -> Result<()> {
        let flow = Arc::new(flow.clone());
        let mut join_set = tokio::task::JoinSet::new();

        for (ci, child) in children.iter().enumerate() {
            let exec = self.clone();
            let flow = flow.clone();
            let child = child.clone();
            let child_ctx = ctx.fork();
            let mut child_path = path.clone();
            child_path.push(PathSeg::Steps(ci));
            let semaphore = self.semaphore.clone();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| BeemFlowError::Cancelled)?;

                exec.run_step(&flow, &child, &child_ctx, run_id, child_path, None)
                    .await?;
                Ok::<_, BeemFlowError>((child.id.clone(), child_ctx.snapshot().outputs))
            });
        }

        // Join barrier: every child completes (or the first failure wins)
        // before anything downstream can observe the merged outputs.
        let mut aggregate = serde_json::Map::new();
        while let Some(joined) = join_set.join_next().await {
            let (child_id, outputs) = joined
                .map_err(|e| BeemFlowError::adapter(format!("parallel task failed: {}", e)))??;
            if let Some(output) = outputs.get(&child_id) {
                aggregate.insert(child_id.clone(), output.clone());
            }
            ctx.merge_outputs(outputs);
        }

        ctx.set_output(step_id.to_string(), Value::Object(aggregate.clone()));
        self.record_step(
            run_id,
            step_id,
            StepStatus::Succeeded,
            started,
            None,
            Some(aggregate.into_iter().collect()),
        )
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Durable pauses
    // ------------------------------------------------------------------

    /// Render an await_event spec: source, match values, wake deadline
    fn render_await_spec(
        &self,
        spec: &crate::model::AwaitEventSpec,
        ctx: &RunContext,
    ) -> Result<(Option<String>, HashMap<String, Value>, Option<i64>)> {
        let template_data = ctx.template_data();

        let source = self.templater.render(&spec.source, &template_data)?;

        let match_: HashMap<String, Value> = spec
            .match_
            .iter()
            .map(|(k, v)| {
                self.render_value(v, &template_data)
                    .map(|rendered| (k.clone(), rendered))
            })
            .collect::<Result<_>>()?;

        let wake_at = spec
            .timeout
            .as_deref()
            .map(Self::parse_timeout)
            .transpose()?
            .map(|dur| Utc::now().timestamp() + dur.as_secs() as i64);

        Ok((Some(source), match_, wake_at))
    }

    /// Persist a continuation and leave the run waiting
    ///
    /// Write order matters for crash recovery: the continuation is durable
    /// before any subscription or timer exists, so a wake-up can never find
    /// a missing continuation, and a crash before subscribing is repaired
    /// by recovery reinstalling from storage.
    #[allow(clippy::too_many_arguments)]
    async fn pause_run(
        &self,
        flow: &Flow,
        step_id: &str,
        ctx: &RunContext,
        run_id: Uuid,
        path: StepPath,
        started: DateTime<Utc>,
        source: Option<String>,
        match_: HashMap<String, Value>,
        wake_at: Option<i64>,
    ) -> Result<()> {
        let token = match match_.get(crate::constants::MATCH_KEY_TOKEN) {
            Some(v) => {
                let token = v.as_str().unwrap_or_default().trim().to_string();
                if token.is_empty() {
                    return Err(BeemFlowError::validation(format!(
                        "await_event in step '{}' rendered an empty token",
                        step_id
                    )));
                }
                token
            }
            // Timed waits correlate by a generated token.
            None => Uuid::new_v4().to_string(),
        };

        let snapshot = ctx.snapshot();
        let paused = PausedRun {
            flow: flow.clone(),
            step_path: path,
            step_id: step_id.to_string(),
            context: snapshot.clone(),
            outputs: snapshot.outputs,
            token: token.clone(),
            run_id,
            source: source.clone(),
            match_: match_.clone(),
            wake_at,
        };

        self.storage
            .save_paused_run(&token, serde_json::to_value(&paused)?)
            .await?;
        self.token_runs.insert(token.clone(), run_id);

        self.record_step(run_id, step_id, StepStatus::Waiting, started, None, None)
            .await?;

        if wake_at.is_some() {
            self.storage.register_wait(&token, wake_at).await?;
        }

        install_pause_subscriptions(
            &self.event_bus,
            &self.subscriptions,
            &self.resume_tx,
            &token,
            source.as_deref(),
            &match_,
        )
        .await?;

        if let Some(wake_at) = wake_at {
            schedule_wake(self.event_bus.clone(), self.shutdown.clone(), &token, wake_at);
        }

        tracing::info!(step = %step_id, %token, "run paused");
        Err(BeemFlowError::Pause { token })
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_wait(
        &self,
        flow: &Flow,
        step_id: &str,
        spec: &WaitSpec,
        ctx: &RunContext,
        run_id: Uuid,
        path: StepPath,
        started: DateTime<Utc>,
    ) -> Result<()> {
        let seconds = self.wait_seconds(spec, ctx)?;

        if seconds == 0 {
            // Nothing to wait for; record and move on.
            ctx.set_output(step_id.to_string(), Value::Object(serde_json::Map::new()));
            self.record_step(
                run_id,
                step_id,
                StepStatus::Succeeded,
                started,
                None,
                Some(HashMap::new()),
            )
            .await?;
            return Ok(());
        }

        let wake_at = Utc::now().timestamp() + seconds as i64;
        self.pause_run(
            flow,
            step_id,
            ctx,
            run_id,
            path,
            started,
            None,
            HashMap::new(),
            Some(wake_at),
        )
        .await
    }

    fn wait_seconds(&self, spec: &WaitSpec, ctx: &RunContext) -> Result<u64> {
        if let Some(seconds) = spec.seconds {
            return Ok(seconds);
        }

        let Some(until) = &spec.until else {
            return Ok(0);
        };

        let rendered = self.templater.render(until, &ctx.template_data())?;
        let target = DateTime::parse_from_rfc3339(&rendered).map_err(|e| {
            BeemFlowError::validation(format!("invalid wait 'until' timestamp '{}': {}", rendered, e))
        })?;

        let delta = target.timestamp() - Utc::now().timestamp();
        Ok(delta.max(0) as u64)
    }

    /// Parse a timeout string ("30s", "5m", "1h") into a Duration
    fn parse_timeout(timeout: &str) -> Result<std::time::Duration> {
        let timeout_str = timeout.trim();

        let (value_str, multiplier) = if let Some(s) = timeout_str.strip_suffix('s') {
            (s, 1)
        } else if let Some(m) = timeout_str.strip_suffix('m') {
            (m, 60)
        } else if let Some(h) = timeout_str.strip_suffix('h') {
            (h, 3600)
        } else {
            return Err(BeemFlowError::validation(format!(
                "Unsupported timeout format: {}. Use '30s', '5m', or '1h'",
                timeout
            )));
        };

        value_str
            .parse::<u64>()
            .map(|v| std::time::Duration::from_secs(v * multiplier))
            .map_err(|_| BeemFlowError::validation(format!("Invalid timeout format: {}", timeout)))
    }

    // ------------------------------------------------------------------
    // Rendering helpers
    // ------------------------------------------------------------------

    /// Step ids inside foreach bodies may be templated per iteration
    fn effective_step_id(&self, step: &Step, ctx: &RunContext) -> Result<String> {
        if !step.id.contains(crate::constants::TEMPLATE_OPEN_DELIM) {
            return Ok(step.id.clone());
        }
        self.templater.render(&step.id, &ctx.template_data())
    }

    /// Render a value tree: strings through the templater, containers recursively
    fn render_value(&self, val: &Value, data: &HashMap<String, Value>) -> Result<Value> {
        match val {
            Value::String(s) => self.templater.render(s, data).map(Value::String),
            Value::Array(arr) => arr
                .iter()
                .map(|elem| self.render_value(elem, data))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| self.render_value(v, data).map(|rendered| (k.clone(), rendered)))
                .collect::<Result<serde_json::Map<String, Value>>>()
                .map(Value::Object),
            _ => Ok(val.clone()),
        }
    }

    /// Evaluate a conditional expression and coerce the result to a boolean
    pub fn evaluate_condition(&self, condition: &str, ctx: &RunContext) -> Result<bool> {
        let trimmed = condition.trim();
        if !trimmed.starts_with(crate::constants::TEMPLATE_OPEN_DELIM)
            || !trimmed.ends_with(crate::constants::TEMPLATE_CLOSE_DELIM)
        {
            return Err(BeemFlowError::validation(format!(
                "condition must use template syntax: {{{{ expression }}}}, got: {}",
                condition
            )));
        }

        let value = self.templater.evaluate(condition, &ctx.template_data())?;

        Ok(match &value {
            Value::Bool(b) => *b,
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" => true,
                "false" | "" => false,
                _ => true,
            },
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            Value::Null => false,
        })
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    async fn record_step(
        &self,
        run_id: Uuid,
        step_name: &str,
        status: StepStatus,
        started_at: DateTime<Utc>,
        error: Option<String>,
        outputs: Option<HashMap<String, Value>>,
    ) -> Result<()> {
        let step_run = crate::model::StepRun {
            id: Uuid::new_v4(),
            run_id,
            step_name: step_name.to_string(),
            status,
            started_at,
            ended_at: match status {
                StepStatus::Waiting | StepStatus::Running | StepStatus::Pending => None,
                _ => Some(Utc::now()),
            },
            error,
            outputs,
        };

        self.storage.save_step(&step_run).await?;
        Ok(())
    }

    fn step_failure(&self, step_id: &str, err: BeemFlowError) -> BeemFlowError {
        match err {
            BeemFlowError::Template(e) => BeemFlowError::StepExecution {
                step_id: step_id.to_string(),
                message: format!("template error: {}", e),
            },
            other => other,
        }
    }
}

/// Resolve the step a continuation path points at
pub(crate) fn step_at_path<'a>(flow: &'a Flow, path: &[PathSeg]) -> Option<&'a Step> {
    let mut list: &'a [Step] = &flow.steps;
    let mut current: Option<&'a Step> = None;

    for seg in path {
        match seg {
            PathSeg::Steps(i) | PathSeg::Do(i) => {
                current = list.get(*i);
                current?;
            }
            PathSeg::Iter(_) => {
                // Only foreach bodies can hold a continuation; pauses are
                // rejected inside parallel blocks at validation time.
                let step = current?;
                match &step.kind {
                    StepKind::Foreach { body, .. } => list = body,
                    _ => return None,
                }
            }
        }
    }

    current
}
