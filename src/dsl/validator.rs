//! Flow validator
//!
//! Structural validation beyond what step-shape resolution already enforces:
//! unique ids per sibling list, resolvable dependency references, acyclic
//! dependency graphs, template syntax where expressions are required, and
//! pause placement rules. Runs before any Run record is created, so a
//! malformed flow never leaves state behind.

use crate::dsl::DependencyAnalyzer;
use crate::model::{AwaitEventSpec, StepKind};
use crate::{BeemFlowError, Flow, Result, Step};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("identifier regex is valid")
});

pub struct Validator;

impl Validator {
    /// Validate a flow for correctness
    pub fn validate(flow: &Flow) -> Result<()> {
        if flow.name.is_empty() {
            return Err(BeemFlowError::validation("Flow name is required"));
        }
        if flow.steps.is_empty() {
            return Err(BeemFlowError::validation(
                "Flow must have at least one step",
            ));
        }

        Self::validate_step_list(&flow.steps, false)?;

        if let Some(catch) = &flow.catch {
            for (key, step) in catch {
                if key != crate::constants::CATCH_WILDCARD {
                    Self::validate_identifier(key)?;
                }
                Self::validate_step(step, true)?;
                if step.can_pause() {
                    return Err(BeemFlowError::validation(format!(
                        "Catch handler '{}' cannot pause",
                        key
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate a sibling step list: ids, dependencies, then each step
    fn validate_step_list(steps: &[Step], inside_parallel: bool) -> Result<()> {
        let mut seen = HashSet::new();
        for step in steps {
            if !seen.insert(step.id.as_str()) {
                return Err(BeemFlowError::validation(format!(
                    "Duplicate step ID: {}",
                    step.id
                )));
            }
        }

        // Resolves depends_on references and rejects cycles.
        DependencyAnalyzer::execution_order(steps)?;

        for step in steps {
            Self::validate_step(step, inside_parallel)?;
        }

        Ok(())
    }

    fn validate_step(step: &Step, inside_parallel: bool) -> Result<()> {
        Self::validate_identifier(&step.id)?;

        if let Some(condition) = &step.condition
            && !Self::is_template_syntax(condition)
        {
            return Err(BeemFlowError::validation(format!(
                "Conditional in step '{}' must use template syntax: {{{{ }}}}",
                step.id
            )));
        }

        match &step.kind {
            StepKind::Call { use_, retry, .. } => {
                if use_.is_empty() {
                    return Err(BeemFlowError::validation(format!(
                        "Step '{}' has an empty 'use'",
                        step.id
                    )));
                }
                if let Some(retry) = retry
                    && retry.attempts == 0
                {
                    return Err(BeemFlowError::validation(format!(
                        "Retry in step '{}' must have at least one attempt",
                        step.id
                    )));
                }
            }

            StepKind::Foreach { expr, bind, body, .. } => {
                if !Self::is_template_syntax(expr) {
                    return Err(BeemFlowError::validation(format!(
                        "Foreach expression in step '{}' must use template syntax: {{{{ }}}}",
                        step.id
                    )));
                }
                Self::validate_identifier(bind)?;
                if body.is_empty() {
                    return Err(BeemFlowError::validation(format!(
                        "Foreach step '{}' has an empty 'do' body",
                        step.id
                    )));
                }
                Self::validate_step_list(body, inside_parallel)?;
            }

            StepKind::Parallel { steps } => {
                Self::validate_step_list(steps, true)?;
            }

            StepKind::AwaitEvent(spec) => {
                Self::validate_await_event(&step.id, spec)?;
                if inside_parallel {
                    return Err(BeemFlowError::validation(format!(
                        "Step '{}': await_event is not allowed inside a parallel block",
                        step.id
                    )));
                }
            }

            StepKind::Wait(_) => {
                if inside_parallel {
                    return Err(BeemFlowError::validation(format!(
                        "Step '{}': wait is not allowed inside a parallel block",
                        step.id
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_await_event(step_id: &str, spec: &AwaitEventSpec) -> Result<()> {
        if spec.source.is_empty() {
            return Err(BeemFlowError::validation(format!(
                "Await event in step '{}' must have 'source'",
                step_id
            )));
        }
        if spec.match_.is_empty() {
            return Err(BeemFlowError::validation(format!(
                "Await event in step '{}' must have 'match'",
                step_id
            )));
        }
        if !spec.match_.contains_key(crate::constants::MATCH_KEY_TOKEN) {
            return Err(BeemFlowError::validation(format!(
                "Await event in step '{}' must have a '{}' key in 'match'",
                step_id,
                crate::constants::MATCH_KEY_TOKEN
            )));
        }
        Ok(())
    }

    /// Validate that a string is a plain identifier
    fn validate_identifier(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(BeemFlowError::validation("Identifier cannot be empty"));
        }

        // Dynamic ids render at runtime inside foreach bodies.
        if id.contains(crate::constants::TEMPLATE_OPEN_DELIM) {
            return Ok(());
        }

        if !IDENTIFIER_RE.is_match(id) {
            return Err(BeemFlowError::validation(format!(
                "Invalid identifier '{}': must start with letter or underscore, contain only alphanumeric and underscore",
                id
            )));
        }

        Ok(())
    }

    /// Check if a string contains template syntax
    fn is_template_syntax(s: &str) -> bool {
        s.contains(crate::constants::TEMPLATE_OPEN_DELIM)
            && s.contains(crate::constants::TEMPLATE_CLOSE_DELIM)
    }
}
