//! Dependency-ordered migration plans.

use super::operation::{Operation, OperationType};
use super::progress::MigrationProgress;
use super::step::{transitive_dependencies, Step, StepId};
use crate::error::{check_state, Error, Result};
use std::collections::BTreeSet;
use std::fmt;

/// The steps that populate a set of ghost tables.
///
/// Steps are listed in planning order. Each step may only run once all of
/// its dependencies have been executed.
#[derive(Debug, Clone)]
pub struct Plan {
    steps: Vec<Step>,
    order: Vec<StepId>,
    ghost_tables: BTreeSet<String>,
}

impl Plan {
    /// Steps in planning order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|id| self.steps.get(id.0))
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Physical ids of the tables this plan populates.
    pub fn ghost_tables(&self) -> &BTreeSet<String> {
        &self.ghost_tables
    }

    pub fn transitive_dependencies(&self, id: StepId) -> BTreeSet<StepId> {
        transitive_dependencies(&self.steps, id)
    }

    /// Steps no other step depends on.
    pub fn steps_without_dependents(&self) -> Vec<StepId> {
        without_dependents(&self.steps, &self.order)
    }

    pub fn can_be_executed(&self, id: StepId) -> bool {
        self.steps.get(id.0).is_some_and(|step| {
            !step.is_executed()
                && step
                    .dependencies()
                    .iter()
                    .all(|dependency| self.steps.get(dependency.0).is_some_and(Step::is_executed))
        })
    }

    /// The first step, in planning order, that can run now.
    pub fn next_step(&self) -> Option<&Step> {
        self.steps().find(|step| self.can_be_executed(step.id()))
    }

    pub fn mark_as_executed(&mut self, id: StepId) -> Result<()> {
        let step = self
            .steps
            .get_mut(id.0)
            .ok_or_else(|| Error::invalid_argument(format!("Unknown step: {}", id.0)))?;
        check_state(!step.is_executed(), || {
            format!("Step: {} was already marked as executed", step)
        })?;
        step.set_executed();
        Ok(())
    }

    pub fn is_executed(&self) -> bool {
        self.steps.iter().all(Step::is_executed)
    }

    /// Position of a step in planning order.
    fn position(&self, id: StepId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, step) in self.steps().enumerate() {
            write!(f, "{}.\t{}", index + 1, step)?;
            if !step.dependencies().is_empty() {
                let positions: Vec<String> = step
                    .dependencies()
                    .iter()
                    .filter_map(|dependency| self.position(*dependency))
                    .map(|position| (position + 1).to_string())
                    .collect();
                write!(f, " depends on: [{}]", positions.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn without_dependents(steps: &[Step], order: &[StepId]) -> Vec<StepId> {
    let depended_on: BTreeSet<StepId> = steps
        .iter()
        .flat_map(|step| step.dependencies().iter().copied())
        .collect();
    order
        .iter()
        .copied()
        .filter(|id| !depended_on.contains(id))
        .collect()
}

/// Incrementally assembles a [`Plan`] while tracking migrated columns.
#[derive(Debug)]
pub(crate) struct PlanBuilder {
    progress: MigrationProgress,
    steps: Vec<Step>,
    order: Vec<StepId>,
}

impl PlanBuilder {
    pub fn new(progress: MigrationProgress) -> Self {
        Self {
            progress,
            steps: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn progress(&self) -> &MigrationProgress {
        &self.progress
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id.0)
    }

    /// Copy the columns of `table` that no step copies yet.
    ///
    /// When all of them are already taken care of, the last copy step of the
    /// table is returned instead.
    pub fn copy(&mut self, table: &str, columns: Vec<String>) -> Result<StepId> {
        if columns.is_empty() {
            return Err(Error::invalid_argument("You cannot copy 0 columns!"));
        }

        let to_do = self.progress.yet_to_be_migrated_columns(table);
        let filtered: Vec<String> = columns
            .into_iter()
            .filter(|column| to_do.contains(column))
            .collect();

        if filtered.is_empty() {
            return self
                .order
                .iter()
                .rev()
                .copied()
                .find(|id| self.is_copy_of(*id, table))
                .ok_or_else(|| {
                    Error::illegal_state(format!("There is nothing left to copy for table: {}", table))
                });
        }

        self.progress.mark_columns_as_migrated(table, &filtered);
        Ok(self.push(Operation::copy(table, filtered), false))
    }

    /// Reuse the placeholder step for exactly these tables, or add one at the front.
    pub fn add_null_record(&mut self, tables: BTreeSet<String>) -> StepId {
        if let Some(existing) = self.find(OperationType::AddNull, &tables) {
            return existing;
        }
        self.push(Operation::add_null(tables), true)
    }

    pub fn drop_null_record(&mut self, tables: BTreeSet<String>) -> StepId {
        if let Some(existing) = self.find(OperationType::DropNull, &tables) {
            return existing;
        }
        self.push(Operation::drop_null(tables), false)
    }

    pub fn add_table_to(&mut self, id: StepId, table: &str) -> Result<()> {
        let step = self
            .steps
            .get_mut(id.0)
            .ok_or_else(|| Error::invalid_argument(format!("Unknown step: {}", id.0)))?;
        step.operation_mut().add_table(table);
        Ok(())
    }

    pub fn find_first_copy(&self, table: &str) -> Option<StepId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.is_copy_of(*id, table))
    }

    /// The placeholder step that covers `table`, if any.
    pub fn find_add_null(&self, table: &str) -> Option<StepId> {
        self.steps
            .iter()
            .find(|step| {
                step.operation().op_type() == OperationType::AddNull
                    && step.operation().covers(table)
            })
            .map(Step::id)
    }

    pub fn transitive_dependencies(&self, id: StepId) -> BTreeSet<StepId> {
        transitive_dependencies(&self.steps, id)
    }

    pub fn steps_without_dependents(&self) -> Vec<StepId> {
        without_dependents(&self.steps, &self.order)
    }

    /// Make `step` run after `other`, refusing edges that close a cycle.
    pub fn make_dependent_on(&mut self, step: StepId, other: StepId) -> Result<()> {
        check_state(
            step != other && !self.transitive_dependencies(other).contains(&step),
            || "This would cause a cycle!".to_string(),
        )?;
        let step = self
            .steps
            .get_mut(step.0)
            .ok_or_else(|| Error::invalid_argument(format!("Unknown step: {}", step.0)))?;
        step.add_dependency(other);
        Ok(())
    }

    pub fn build(self, ghost_tables: BTreeSet<String>) -> Plan {
        Plan {
            steps: self.steps,
            order: self.order,
            ghost_tables,
        }
    }

    fn is_copy_of(&self, id: StepId, table: &str) -> bool {
        self.steps.get(id.0).is_some_and(|step| {
            step.operation().op_type() == OperationType::Copy && step.operation().covers(table)
        })
    }

    fn find(&self, op_type: OperationType, tables: &BTreeSet<String>) -> Option<StepId> {
        self.steps
            .iter()
            .find(|step| step.operation().op_type() == op_type && step.operation().tables() == tables)
            .map(Step::id)
    }

    fn push(&mut self, operation: Operation, first: bool) -> StepId {
        let id = StepId(self.steps.len());
        self.steps.push(Step::new(id, operation));
        if first {
            self.order.insert(0, id);
        } else {
            self.order.push(id);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Column, ColumnType, Hint, Table};

    fn builder() -> PlanBuilder {
        let mut catalog = Catalog::new("test");
        catalog
            .add_table(
                Table::new("films")
                    .with_column(Column::new("id", ColumnType::Int4).with_hint(Hint::Identity))
                    .with_column(Column::new("name", ColumnType::Text)),
            )
            .unwrap();
        let tables = ["films".to_string()];
        PlanBuilder::new(MigrationProgress::new(&catalog, &tables).unwrap())
    }

    #[test]
    fn test_copy_filters_migrated_columns() {
        let mut builder = builder();
        let first = builder.copy("films", vec!["id".into()]).unwrap();
        let second = builder
            .copy("films", vec!["id".into(), "name".into()])
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(builder.step(second).unwrap().operation().columns(), ["name"]);

        // Nothing left: the last copy is reused.
        assert_eq!(builder.copy("films", vec!["name".into()]).unwrap(), second);
        assert!(builder.copy("films", vec![]).is_err());
    }

    #[test]
    fn test_cycles_are_rejected() {
        let mut builder = builder();
        let first = builder.copy("films", vec!["id".into()]).unwrap();
        let second = builder.copy("films", vec!["name".into()]).unwrap();
        builder.make_dependent_on(second, first).unwrap();
        assert!(builder.make_dependent_on(first, second).is_err());
        assert!(builder.make_dependent_on(first, first).is_err());
    }

    #[test]
    fn test_add_null_goes_first_and_execution_order() {
        let mut builder = builder();
        let copy = builder.copy("films", vec!["id".into(), "name".into()]).unwrap();
        let add_null = builder.add_null_record(BTreeSet::from(["films".to_string()]));
        builder.make_dependent_on(copy, add_null).unwrap();
        assert_eq!(
            builder.add_null_record(BTreeSet::from(["films".to_string()])),
            add_null
        );

        let mut plan = builder.build(BTreeSet::from(["films".to_string()]));
        assert_eq!(plan.steps().next().unwrap().id(), add_null);
        assert_eq!(plan.steps_without_dependents(), vec![copy]);

        let next = plan.next_step().unwrap().id();
        assert_eq!(next, add_null);
        assert!(!plan.can_be_executed(copy));
        plan.mark_as_executed(next).unwrap();
        assert!(plan.mark_as_executed(next).is_err());

        assert_eq!(plan.next_step().unwrap().id(), copy);
        plan.mark_as_executed(copy).unwrap();
        assert!(plan.is_executed());
        assert!(plan.next_step().is_none());
    }

    #[test]
    fn test_display() {
        let mut builder = builder();
        let copy = builder.copy("films", vec!["id".into(), "name".into()]).unwrap();
        let add_null = builder.add_null_record(BTreeSet::from(["films".to_string()]));
        builder.make_dependent_on(copy, add_null).unwrap();
        let plan = builder.build(BTreeSet::new());
        assert_eq!(
            plan.to_string(),
            "1.\tADD_NULL [films]\n2.\tCOPY [films] [id, name] depends on: [1]\n"
        );
    }
}
