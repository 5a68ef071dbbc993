//! Dependency scheduling for step lists
//!
//! Steps run in declared order unless `depends_on` forces a reorder. The
//! schedule is a stable topological sort: whenever several steps are ready,
//! the one declared first runs first, so flows without dependencies execute
//! exactly top-to-bottom and scheduling stays deterministic across resumes.

use crate::error::{BeemFlowError, Result};
use crate::model::Step;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Computes deterministic execution order for a sibling step list
pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    /// Topologically order a step list by explicit `depends_on` edges
    ///
    /// Returns indices into `steps` in execution order. Unknown references
    /// and cycles are validation errors.
    pub fn execution_order(steps: &[Step]) -> Result<Vec<usize>> {
        let index_of: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut indegree = vec![0usize; steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

        for (i, step) in steps.iter().enumerate() {
            let Some(deps) = &step.depends_on else {
                continue;
            };
            for dep in deps {
                let Some(&j) = index_of.get(dep.as_str()) else {
                    return Err(BeemFlowError::validation(format!(
                        "Step '{}' depends on non-existent step '{}'",
                        step.id, dep
                    )));
                };
                if j == i {
                    return Err(BeemFlowError::validation(format!(
                        "Step '{}' depends on itself",
                        step.id
                    )));
                }
                indegree[i] += 1;
                dependents[j].push(i);
            }
        }

        // Min-heap on declared position keeps the sort stable.
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(steps.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &dependent in &dependents[i] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != steps.len() {
            let stuck = steps
                .iter()
                .enumerate()
                .find(|(i, _)| indegree[*i] > 0)
                .map(|(_, s)| s.id.clone())
                .unwrap_or_default();
            return Err(BeemFlowError::validation(format!(
                "Circular dependency detected involving step '{}'",
                stuck
            )));
        }

        Ok(order)
    }
}
