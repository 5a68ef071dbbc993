//! Run execution context
//!
//! The mutable map every template sees during a run: the trigger event,
//! flow variables, and one entry per completed step id. A run has exactly
//! one writer at a time; parallel children work on forked snapshots that
//! are merged back on join, so child ids never race.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Context for a single run's execution
#[derive(Debug, Clone)]
pub struct RunContext {
    event: Arc<RwLock<HashMap<String, Value>>>,
    vars: Arc<RwLock<HashMap<String, Value>>>,
    outputs: Arc<RwLock<HashMap<String, Value>>>,
}

impl RunContext {
    /// Create a new run context
    pub fn new(event: HashMap<String, Value>, vars: HashMap<String, Value>) -> Self {
        Self {
            event: Arc::new(RwLock::new(event)),
            vars: Arc::new(RwLock::new(vars)),
            outputs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Rebuild a context from a persisted snapshot
    pub fn restore(snapshot: ContextSnapshot) -> Self {
        let ctx = Self::new(snapshot.event, snapshot.vars);
        *ctx.outputs.write() = snapshot.outputs;
        ctx
    }

    /// Deep-copy this context for a parallel child
    ///
    /// The child sees everything recorded so far but its writes stay local
    /// until the join merges them back.
    pub fn fork(&self) -> Self {
        Self::restore(self.snapshot())
    }

    /// Merge a child's outputs back after a join (last-writer-wins)
    pub fn merge_outputs(&self, outputs: HashMap<String, Value>) {
        self.outputs.write().extend(outputs);
    }

    /// Get an output value
    pub fn get_output(&self, key: &str) -> Option<Value> {
        self.outputs.read().get(key).cloned()
    }

    /// Set an output value
    pub fn set_output(&self, key: String, value: Value) {
        self.outputs.write().insert(key, value);
    }

    /// Set a variable value
    pub fn set_var(&self, key: String, value: Value) {
        self.vars.write().insert(key, value);
    }

    /// Get a snapshot of the context (cloned data)
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            event: self.event.read().clone(),
            vars: self.vars.read().clone(),
            outputs: self.outputs.read().clone(),
        }
    }

    /// Build the mapping templates render against
    ///
    /// Structured keys: `event`, `vars`, `steps` (and its alias `outputs`).
    /// Vars and step outputs are additionally flattened to top level so a
    /// flow writes `{{ s1.text }}` and `{{ item }}` directly; only valid
    /// identifiers are flattened.
    pub fn template_data(&self) -> HashMap<String, Value> {
        let snapshot = self.snapshot();
        let mut data = HashMap::new();

        let to_object = |map: &HashMap<String, Value>| {
            Value::Object(map.clone().into_iter().collect())
        };

        data.insert(
            crate::constants::TEMPLATE_FIELD_EVENT.to_string(),
            to_object(&snapshot.event),
        );
        data.insert(
            crate::constants::TEMPLATE_FIELD_VARS.to_string(),
            to_object(&snapshot.vars),
        );
        data.insert(
            crate::constants::TEMPLATE_FIELD_STEPS.to_string(),
            to_object(&snapshot.outputs),
        );
        data.insert(
            crate::constants::TEMPLATE_FIELD_OUTPUTS.to_string(),
            to_object(&snapshot.outputs),
        );

        data.extend(
            snapshot
                .vars
                .into_iter()
                .filter(|(k, _)| is_valid_identifier(k)),
        );
        data.extend(
            snapshot
                .outputs
                .into_iter()
                .filter(|(k, _)| is_valid_identifier(k)),
        );

        data
    }
}

/// Immutable snapshot of context data
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContextSnapshot {
    pub event: HashMap<String, Value>,
    pub vars: HashMap<String, Value>,
    pub outputs: HashMap<String, Value>,
}

/// Check if a string is a plain identifier (no template syntax)
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_alphabetic() && first != '_' {
        return false;
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
