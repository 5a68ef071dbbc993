//! Core data models for BeemFlow
//!
//! This module contains the data structures that define BeemFlow workflows,
//! runs, and steps. A `Step`'s control-flow shape is a tagged sum type
//! (`StepKind`): the YAML surface stays permissive, but ambiguous
//! combinations are rejected when the raw mapping is resolved at parse time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A complete workflow definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flow {
    /// Unique workflow identifier (REQUIRED)
    pub name: String,

    /// Human-readable description (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Semantic version (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Trigger descriptor (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<Trigger>,

    /// Workflow-level variables (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vars: Option<HashMap<String, Value>>,

    /// Ordered execution steps (REQUIRED)
    pub steps: Vec<Step>,

    /// Error handlers keyed by step id; "*" is the wildcard handler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catch: Option<HashMap<String, Step>>,
}

/// Trigger descriptor for workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Single trigger topic as string
    Single(String),
    /// Multiple trigger topics
    Multiple(Vec<String>),
    /// Raw value for forward compatibility (accepts any valid JSON)
    Raw(Value),
}

impl Trigger {
    /// All topic strings named by this trigger
    pub fn topics(&self) -> Vec<String> {
        match self {
            Trigger::Single(t) => vec![t.clone()],
            Trigger::Multiple(ts) => ts.clone(),
            Trigger::Raw(v) => match v {
                Value::String(s) => vec![s.clone()],
                Value::Array(arr) => arr
                    .iter()
                    .filter_map(|e| e.as_str().map(String::from))
                    .collect(),
                _ => Vec::new(),
            },
        }
    }
}

/// A single workflow step
///
/// The wire format is the flat mapping accepted by the YAML/JSON surface
/// (`RawStep`); resolution into the tagged `StepKind` happens during
/// deserialization so every constructed `Step` has exactly one shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct Step {
    /// Unique step identifier within its sibling list
    pub id: String,

    /// Conditional predicate; the step is skipped when falsy
    pub condition: Option<String>,

    /// Explicit sibling dependencies
    pub depends_on: Option<Vec<String>>,

    /// Control-flow shape
    pub kind: StepKind,
}

/// Control-flow shape of a step: exactly one of these per step
#[derive(Debug, Clone)]
pub enum StepKind {
    /// Adapter invocation
    Call {
        use_: String,
        with: HashMap<String, Value>,
        retry: Option<RetrySpec>,
    },

    /// Iterate a collection expression, binding each element
    Foreach {
        expr: String,
        bind: String,
        parallel: bool,
        body: Vec<Step>,
    },

    /// Run child steps concurrently, join before advancing
    Parallel { steps: Vec<Step> },

    /// Durable pause until a matching event arrives
    AwaitEvent(AwaitEventSpec),

    /// Durable pause for a duration or until a wall-clock time
    Wait(WaitSpec),
}

/// Retry configuration for an adapter call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySpec {
    /// Total attempts (including the first)
    pub attempts: u32,

    /// Base delay between attempts in seconds
    pub delay_sec: u64,
}

/// Event wait configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwaitEventSpec {
    /// Event source topic
    pub source: String,

    /// Match criteria; must include a correlation token
    #[serde(rename = "match")]
    pub match_: HashMap<String, Value>,

    /// Timeout duration string ("30s", "5m", "1h")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Time delay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSpec {
    /// Wait this many seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,

    /// Wait until this RFC3339 timestamp (may be a template)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
}

/// Flat wire representation of a step, as written in YAML/JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStep {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none", rename = "use")]
    pub use_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub with: Option<HashMap<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "if")]
    pub if_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreach: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "as")]
    pub as_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "do")]
    pub do_: Option<Vec<Step>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub await_event: Option<AwaitEventSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitSpec>,
}

impl TryFrom<RawStep> for Step {
    type Error = String;

    fn try_from(raw: RawStep) -> std::result::Result<Self, Self::Error> {
        if raw.id.is_empty() {
            return Err("step id is required".to_string());
        }

        // Count the primary shapes present in the raw mapping. A foreach with
        // parallel=true is one shape (parallel iteration), not two.
        let mut shapes: Vec<&str> = Vec::new();
        if raw.use_.is_some() {
            shapes.push("use");
        }
        if raw.foreach.is_some() {
            shapes.push("foreach");
        }
        if raw.parallel == Some(true) && raw.foreach.is_none() {
            shapes.push("parallel");
        }
        if raw.await_event.is_some() {
            shapes.push("await_event");
        }
        if raw.wait.is_some() {
            shapes.push("wait");
        }

        if shapes.len() > 1 {
            return Err(format!(
                "step '{}' is ambiguous: has {} (exactly one control-flow shape allowed)",
                raw.id,
                shapes.join(" and ")
            ));
        }

        let kind = if let Some(use_) = raw.use_ {
            if raw.steps.is_some() || raw.do_.is_some() {
                return Err(format!(
                    "step '{}' cannot combine 'use' with nested steps",
                    raw.id
                ));
            }
            // core.wait is interpreter territory: treat it as a durable wait
            // so it survives restarts like any other pause.
            if use_ == crate::constants::CORE_WAIT {
                let seconds = raw
                    .with
                    .as_ref()
                    .and_then(|w| w.get("seconds"))
                    .and_then(Value::as_u64);
                let until = raw
                    .with
                    .as_ref()
                    .and_then(|w| w.get("until"))
                    .and_then(Value::as_str)
                    .map(String::from);
                StepKind::Wait(WaitSpec { seconds, until })
            } else {
                StepKind::Call {
                    use_,
                    with: raw.with.unwrap_or_default(),
                    retry: raw.retry,
                }
            }
        } else if let Some(expr) = raw.foreach {
            let bind = raw
                .as_
                .ok_or_else(|| format!("foreach step '{}' must have 'as'", raw.id))?;
            let body = raw
                .do_
                .ok_or_else(|| format!("foreach step '{}' must have 'do'", raw.id))?;
            if raw.steps.is_some() {
                return Err(format!(
                    "foreach step '{}' takes 'do', not 'steps'",
                    raw.id
                ));
            }
            StepKind::Foreach {
                expr,
                bind,
                parallel: raw.parallel == Some(true),
                body,
            }
        } else if raw.parallel == Some(true) {
            let steps = raw.steps.ok_or_else(|| {
                format!("parallel step '{}' must have 'steps'", raw.id)
            })?;
            if steps.is_empty() {
                return Err(format!("parallel step '{}' has no children", raw.id));
            }
            StepKind::Parallel { steps }
        } else if let Some(spec) = raw.await_event {
            StepKind::AwaitEvent(spec)
        } else if let Some(spec) = raw.wait {
            if spec.seconds.is_none() && spec.until.is_none() {
                return Err(format!(
                    "wait step '{}' must have 'seconds' or 'until'",
                    raw.id
                ));
            }
            StepKind::Wait(spec)
        } else if raw.steps.is_some() {
            return Err(format!(
                "step '{}' has nested 'steps' without 'parallel: true'",
                raw.id
            ));
        } else {
            return Err(format!(
                "step '{}' must have one of: use, foreach+as+do, parallel+steps, await_event, wait",
                raw.id
            ));
        };

        Ok(Step {
            id: raw.id,
            condition: raw.if_,
            depends_on: raw.depends_on,
            kind,
        })
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        let mut raw = RawStep {
            id: step.id,
            if_: step.condition,
            depends_on: step.depends_on,
            ..Default::default()
        };

        match step.kind {
            StepKind::Call { use_, with, retry } => {
                raw.use_ = Some(use_);
                if !with.is_empty() {
                    raw.with = Some(with);
                }
                raw.retry = retry;
            }
            StepKind::Foreach {
                expr,
                bind,
                parallel,
                body,
            } => {
                raw.foreach = Some(expr);
                raw.as_ = Some(bind);
                if parallel {
                    raw.parallel = Some(true);
                }
                raw.do_ = Some(body);
            }
            StepKind::Parallel { steps } => {
                raw.parallel = Some(true);
                raw.steps = Some(steps);
            }
            StepKind::AwaitEvent(spec) => raw.await_event = Some(spec),
            StepKind::Wait(spec) => raw.wait = Some(spec),
        }

        raw
    }
}

impl Step {
    /// Whether this step (or any step nested under it) can durably pause
    pub fn can_pause(&self) -> bool {
        match &self.kind {
            StepKind::AwaitEvent(_) | StepKind::Wait(_) => true,
            StepKind::Foreach { body, .. } => body.iter().any(Step::can_pause),
            StepKind::Parallel { steps } => steps.iter().any(Step::can_pause),
            StepKind::Call { .. } => false,
        }
    }
}

/// One segment of a continuation's step path
///
/// A paused run records where in the (possibly nested) step lists execution
/// stopped as a list of `(scope, position)` segments, e.g.
/// `[Steps(3)]` for a top-level pause, or `[Steps(1), Iter(2), Do(0)]` for a
/// pause inside the third iteration of a foreach body. An index path is
/// serializable, so the continuation survives process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "pos", rename_all = "snake_case")]
pub enum PathSeg {
    /// Position in a sibling `steps` list
    Steps(usize),
    /// Iteration index of a foreach
    Iter(usize),
    /// Position in a foreach `do` body
    Do(usize),
}

/// Full path from the flow's top-level step list to a paused step
pub type StepPath = Vec<PathSeg>;

/// A workflow run instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier
    pub id: Uuid,

    /// Flow name
    pub flow_name: String,

    /// Event data that triggered this run
    pub event: HashMap<String, Value>,

    /// Flow variables
    pub vars: HashMap<String, Value>,

    /// Current run status
    pub status: RunStatus,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// End timestamp (if completed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Step execution records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<StepRun>>,
}

/// Run execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run is pending execution
    Pending,

    /// Run is currently executing
    Running,

    /// Run is waiting for an external event or timer
    Waiting,

    /// Run completed successfully
    Succeeded,

    /// Run failed with error
    Failed,

    /// Run was skipped (duplicate suppression)
    Skipped,
}

impl RunStatus {
    /// Whether this status is terminal
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Skipped
        )
    }
}

/// A single step execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    /// Unique step run identifier
    pub id: Uuid,

    /// Parent run identifier
    pub run_id: Uuid,

    /// Step name/ID
    pub step_name: String,

    /// Step execution status
    pub status: StepStatus,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// End timestamp (if completed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Step outputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<HashMap<String, Value>>,
}

/// Step execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Step is pending execution
    Pending,

    /// Step is currently executing
    Running,

    /// Step is waiting for an external event or timer
    Waiting,

    /// Step completed successfully
    Succeeded,

    /// Step failed with error
    Failed,

    /// Step was skipped (conditional)
    Skipped,
}
