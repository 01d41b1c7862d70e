//! Plan steps and their dependency edges.

use super::operation::Operation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Index of a step within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub(crate) usize);

impl StepId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One operation of a plan and the steps that must run before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    id: StepId,
    operation: Operation,
    dependencies: BTreeSet<StepId>,
    executed: bool,
}

impl Step {
    pub(crate) fn new(id: StepId, operation: Operation) -> Self {
        Self {
            id,
            operation,
            dependencies: BTreeSet::new(),
            executed: false,
        }
    }

    pub fn id(&self) -> StepId {
        self.id
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub(crate) fn operation_mut(&mut self) -> &mut Operation {
        &mut self.operation
    }

    /// Direct dependencies.
    pub fn dependencies(&self) -> &BTreeSet<StepId> {
        &self.dependencies
    }

    pub(crate) fn add_dependency(&mut self, other: StepId) {
        self.dependencies.insert(other);
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub(crate) fn set_executed(&mut self) {
        self.executed = true;
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.operation, f)
    }
}

/// Every step `id` depends on, directly or indirectly.
pub(crate) fn transitive_dependencies(steps: &[Step], id: StepId) -> BTreeSet<StepId> {
    let mut dependencies = BTreeSet::new();
    let mut queue: Vec<StepId> = steps
        .get(id.0)
        .map(|step| step.dependencies.iter().copied().collect())
        .unwrap_or_default();

    while let Some(next) = queue.pop() {
        if !dependencies.insert(next) {
            continue;
        }
        if let Some(step) = steps.get(next.0) {
            queue.extend(step.dependencies.iter().copied());
        }
    }
    dependencies
}
