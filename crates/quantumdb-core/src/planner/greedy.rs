//! Greedy migration planner.
//!
//! Ghost tables are copied in rounds. Each round picks the pending tables
//! that refer to the fewest other pending tables; within a cycle, the table
//! most other tables depend on goes first. Columns referring to tables not
//! yet copied are postponed to a later step on the same table, and NOT NULL
//! keys that cannot be satisfied yet are served by placeholder rows, added
//! up front and dropped once everything else has run.

use super::graph::ForeignKeyGraph;
use super::plan::{Plan, PlanBuilder};
use super::progress::{MigrationProgress, Progress};
use super::step::StepId;
use super::{MigrationPlanner, OperationType};
use crate::catalog::{Catalog, Table};
use crate::error::{check_state, Error, Result};
use crate::migration::{SchemaOperationsMigrator, VersionTraverser};
use crate::versioning::State;
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, info};

/// Plans data migrations one table batch at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyMigrationPlanner;

impl GreedyMigrationPlanner {
    pub fn new() -> Self {
        Self
    }
}

impl MigrationPlanner for GreedyMigrationPlanner {
    fn create_plan(&self, state: &mut State, from: &str, to: &str) -> Result<Plan> {
        info!(%from, %to, "Creating migration plan");

        let path: Vec<String> = VersionTraverser::find_child_path(&state.changelog, from, to)
            .ok_or_else(|| Error::NoPath {
                from: from.to_string(),
                to: to.to_string(),
            })?
            .iter()
            .map(|version| version.id().to_string())
            .collect();

        for id in path.iter().skip(1) {
            let version = state.changelog.get_version(id)?;
            if let Some(operation) = version.operation() {
                if operation.is_data_operation() {
                    return Err(Error::invalid_argument(format!(
                        "Cannot execute data operation during schema operations phase: {}",
                        id
                    )));
                }
                debug!(version = %id, %operation, "Planning operation");
            }
        }

        for id in path.iter().skip(1) {
            if !state.ref_log.contains_version(id) {
                SchemaOperationsMigrator::migrate(state, id)?;
            }
        }

        let before = state.table_mapping.get_table_ids(from);
        let ghost_tables: BTreeSet<String> = state
            .table_mapping
            .get_table_ids(to)
            .into_iter()
            .filter(|table| !before.contains(table))
            .collect();
        debug!(ghost_tables = ?ghost_tables, "Ghost tables to populate");

        let plan = Planner::new(&state.catalog, ghost_tables)?.create_plan()?;
        #[cfg(debug_assertions)]
        super::PlanValidator::validate(&plan, &state.catalog)?;

        info!(steps = plan.len(), ghost_tables = plan.ghost_tables().len(), "Created migration plan");
        debug!("Migration plan:\n{}", plan);
        Ok(plan)
    }
}

struct Planner<'a> {
    catalog: &'a Catalog,
    ghost_tables: BTreeSet<String>,
    graph: ForeignKeyGraph<'a>,
    builder: PlanBuilder,
    null_records: BTreeSet<String>,
}

impl<'a> Planner<'a> {
    fn new(catalog: &'a Catalog, ghost_tables: BTreeSet<String>) -> Result<Self> {
        let graph = ForeignKeyGraph::from_catalog(catalog, &ghost_tables)?;
        let progress = MigrationProgress::new(catalog, &ghost_tables)?;
        Ok(Self {
            catalog,
            ghost_tables,
            graph,
            builder: PlanBuilder::new(progress),
            null_records: BTreeSet::new(),
        })
    }

    fn create_plan(mut self) -> Result<Plan> {
        loop {
            let to_do = self.to_do();
            if to_do.is_empty() {
                break;
            }

            let least = self.graph.least_outgoing_foreign_keys(&to_do);
            let batch = if least.count == 0 {
                least.tables
            } else {
                self.graph.most_incoming_foreign_keys(&least.tables).tables
            };
            debug!(tables = ?batch, "Migrating tables");
            self.migrate_tables(batch.into_iter().collect())?;
        }

        self.complete_partial_tables()?;
        self.add_drop_nulls_step()?;
        Ok(self.builder.build(self.ghost_tables))
    }

    /// Ghost tables no step has started copying yet.
    fn to_do(&self) -> BTreeSet<String> {
        self.graph
            .table_ids()
            .filter(|table| self.progress(table) == Progress::Pending)
            .cloned()
            .collect()
    }

    fn progress(&self, table: &str) -> Progress {
        self.builder.progress().progress(table)
    }

    /// Whether `table` is a ghost no step has started copying yet.
    fn is_pending(&self, table: &str) -> bool {
        self.graph.contains(table) && self.progress(table) == Progress::Pending
    }

    fn migrate_tables(&mut self, tables: VecDeque<String>) -> Result<()> {
        let catalog = self.catalog;
        let mut to_migrate = tables;
        let mut deferrals = 0;

        while let Some(table_id) = to_migrate.pop_front() {
            if self.progress(&table_id) != Progress::Pending {
                continue;
            }
            let table = catalog.table(&table_id)?;
            let columns: Vec<String> = table
                .columns()
                .iter()
                .filter(|column| self.is_copyable(table, &column.name))
                .map(|column| column.name.clone())
                .collect();

            let missing: Vec<String> = table
                .identity_column_names()
                .into_iter()
                .filter(|column| !columns.contains(column))
                .collect();
            if !missing.is_empty() {
                // Copy the tables the identity columns refer to first.
                deferrals += 1;
                check_state(deferrals <= self.ghost_tables.len(), || {
                    format!("Unable to migrate the identity columns of table: {}", table_id)
                })?;
                let parents: BTreeSet<String> = table
                    .foreign_keys()
                    .iter()
                    .filter(|key| key.involves_any(&missing))
                    .map(|key| key.referred_table.clone())
                    .filter(|parent| *parent != table_id && self.is_pending(parent))
                    .collect();
                check_state(!parents.is_empty(), || {
                    format!("Unable to migrate the identity columns of table: {}", table_id)
                })?;

                to_migrate.push_front(table_id);
                for parent in parents {
                    to_migrate.retain(|candidate| *candidate != parent);
                    to_migrate.push_front(parent);
                }
                continue;
            }

            let dependencies = self.copy_dependencies(table, &columns);
            let step = self.builder.copy(&table_id, columns)?;
            for dependency in dependencies {
                self.builder.make_dependent_on(step, dependency)?;
            }
            self.apply_rules(step)?;
        }
        Ok(())
    }

    /// A column can be copied once every ghost its keys refer to has been started.
    fn is_copyable(&self, table: &Table, column: &str) -> bool {
        table
            .foreign_keys()
            .iter()
            .filter(|key| key.referencing_columns.iter().any(|c| c == column))
            .all(|key| !self.is_pending(&key.referred_table))
    }

    /// First copies of the tables referred to by the copied columns, minus
    /// those already implied by another one.
    fn copy_dependencies(&self, table: &Table, columns: &[String]) -> Vec<StepId> {
        let steps: BTreeSet<StepId> = table
            .foreign_keys()
            .iter()
            .filter(|key| key.involves_any(columns))
            .filter_map(|key| self.builder.find_first_copy(&key.referred_table))
            .collect();
        let implied: BTreeSet<StepId> = steps
            .iter()
            .flat_map(|step| self.builder.transitive_dependencies(*step))
            .collect();
        steps.into_iter().filter(|step| !implied.contains(step)).collect()
    }

    fn apply_rules(&mut self, step: StepId) -> Result<()> {
        self.apply_dependency_rule(step)?;
        self.complete_partial_tables()
    }

    /// A partial copy leaves NOT NULL keys unset; make sure the tables they
    /// refer to hold placeholder rows before the copy runs.
    fn apply_dependency_rule(&mut self, step: StepId) -> Result<()> {
        let catalog = self.catalog;
        let operation = match self.builder.step(step) {
            Some(step) if step.operation().op_type() == OperationType::Copy => step.operation().clone(),
            _ => return Ok(()),
        };
        let Some(table_id) = operation.table() else {
            return Ok(());
        };
        let table = catalog.table(table_id)?;

        let copied: BTreeSet<&String> = operation.columns().iter().collect();
        if table.columns().iter().all(|column| copied.contains(&column.name)) {
            return Ok(());
        }

        for key in table.foreign_keys() {
            if !catalog.is_not_nullable(key) && !table.is_inheritance_relation(key) {
                continue;
            }
            // Rows of live tables already satisfy the key.
            let other = &key.referred_table;
            if !self.graph.contains(other) {
                continue;
            }

            if self.null_records.insert(other.clone()) {
                let dependency = self.builder.add_null_record(BTreeSet::from([other.clone()]));
                self.builder.make_dependent_on(step, dependency)?;
                self.expand_null_records(dependency)?;
            } else if let Some(dependency) = self.builder.find_add_null(other) {
                if !self.builder.transitive_dependencies(step).contains(&dependency) {
                    self.builder.make_dependent_on(step, dependency)?;
                }
            }
        }
        Ok(())
    }

    /// Placeholder rows carry NOT NULL keys themselves; the ghosts those
    /// refer to get placeholders in the same step.
    fn expand_null_records(&mut self, step: StepId) -> Result<()> {
        let catalog = self.catalog;
        let mut pending: Vec<String> = self
            .builder
            .step(step)
            .map(|step| step.operation().tables().iter().cloned().collect())
            .unwrap_or_default();

        while let Some(table_id) = pending.pop() {
            let table = catalog.table(&table_id)?;
            for key in table.foreign_keys() {
                if !catalog.is_not_nullable(key) && !table.is_inheritance_relation(key) {
                    continue;
                }
                let other = &key.referred_table;
                if self.graph.contains(other) && self.null_records.insert(other.clone()) {
                    self.builder.add_table_to(step, other)?;
                    pending.push(other.clone());
                }
            }
        }
        Ok(())
    }

    /// Copy the remaining columns of partially copied tables whose keys
    /// only refer to tables that have been started.
    fn complete_partial_tables(&mut self) -> Result<()> {
        let catalog = self.catalog;
        for table_id in self.builder.progress().partially_migrated_tables() {
            let to_migrate = self.builder.progress().yet_to_be_migrated_columns(&table_id);
            if to_migrate.is_empty() {
                continue;
            }

            let table = catalog.table(&table_id)?;
            let ready = table
                .foreign_keys()
                .iter()
                .all(|key| !self.is_pending(&key.referred_table));
            if !ready {
                continue;
            }

            let mut dependencies = self.copy_dependencies(table, &to_migrate);
            if let Some(first) = self.builder.find_first_copy(&table_id) {
                dependencies.push(first);
            }
            let step = self.builder.copy(&table_id, to_migrate)?;
            for dependency in dependencies {
                if dependency != step && !self.builder.transitive_dependencies(step).contains(&dependency) {
                    self.builder.make_dependent_on(step, dependency)?;
                }
            }
            self.apply_rules(step)?;
        }
        Ok(())
    }

    fn add_drop_nulls_step(&mut self) -> Result<()> {
        if self.null_records.is_empty() {
            return Ok(());
        }

        let last = self.builder.steps_without_dependents();
        let step = self.builder.drop_null_record(self.null_records.clone());
        for other in last {
            if other != step {
                self.builder.make_dependent_on(step, other)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, ColumnType, ForeignKey, Hint};
    use crate::schema::{ColumnDefinition, SchemaOperation};
    use crate::versioning::{ChangeSet, Changelog, CurrentVersion};

    fn state(catalog: Catalog, operations: Vec<(&str, SchemaOperation)>) -> State {
        let mut changelog = Changelog::with_root("root").unwrap();
        let mut current = CurrentVersion::new("root");
        for (id, operation) in operations {
            changelog
                .add_version(&mut current, id, ChangeSet::new("test", None).unwrap(), operation)
                .unwrap();
        }
        State::bootstrap(catalog, changelog).unwrap()
    }

    fn single_table() -> Catalog {
        let mut catalog = Catalog::new("test-db");
        catalog
            .add_table(
                Table::new("test")
                    .with_column(
                        Column::new("id", ColumnType::Int4)
                            .with_hints([Hint::Identity, Hint::AutoIncrement, Hint::NotNull]),
                    )
                    .with_column(Column::new("name", ColumnType::Varchar(255)).with_hint(Hint::NotNull)),
            )
            .unwrap();
        catalog
    }

    /// `nodes` with a nullable self reference and `edges` pointing at it twice.
    fn graph() -> Catalog {
        let mut catalog = Catalog::new("graph-db");
        catalog
            .add_table(
                Table::new("nodes")
                    .with_column(Column::new("id", ColumnType::Int8).with_hint(Hint::Identity))
                    .with_column(Column::new("parent_id", ColumnType::Int8)),
            )
            .unwrap();
        catalog
            .add_table(
                Table::new("edges")
                    .with_column(Column::new("id", ColumnType::Int8).with_hint(Hint::Identity))
                    .with_column(Column::new("source_id", ColumnType::Int8).with_hint(Hint::NotNull))
                    .with_column(Column::new("target_id", ColumnType::Int8).with_hint(Hint::NotNull)),
            )
            .unwrap();
        for key in [
            ForeignKey::new("nodes", ["parent_id"], "nodes", ["id"]),
            ForeignKey::new("edges", ["source_id"], "nodes", ["id"]),
            ForeignKey::new("edges", ["target_id"], "nodes", ["id"]),
        ] {
            catalog.add_foreign_key(key).unwrap();
        }
        catalog
    }

    #[test]
    fn test_single_table_is_one_copy() {
        let column = ColumnDefinition::new("date_of_birth", ColumnType::Date).unwrap();
        let mut state = state(
            single_table(),
            vec![("v1", SchemaOperation::add_column("test", column).unwrap())],
        );
        let plan = GreedyMigrationPlanner::new()
            .create_plan(&mut state, "root", "v1")
            .unwrap();

        let ghost = state.table_mapping.get_table_id("v1", "test").unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.ghost_tables(), &BTreeSet::from([ghost.to_string()]));

        let step = plan.steps().next().unwrap();
        assert_eq!(step.operation().op_type(), OperationType::Copy);
        assert_eq!(step.operation().table(), Some(ghost));
        assert_eq!(step.operation().columns(), ["id", "name", "date_of_birth"]);
        assert!(step.dependencies().is_empty());
    }

    #[test]
    fn test_self_reference_is_copied_in_a_second_pass() {
        let column = ColumnDefinition::new("label", ColumnType::Text).unwrap();
        let mut state = state(
            graph(),
            vec![("v1", SchemaOperation::add_column("nodes", column).unwrap())],
        );
        let plan = GreedyMigrationPlanner::new()
            .create_plan(&mut state, "root", "v1")
            .unwrap();

        let nodes = state.table_mapping.get_table_id("v1", "nodes").unwrap().to_string();
        let edges = state.table_mapping.get_table_id("v1", "edges").unwrap().to_string();
        assert_eq!(plan.ghost_tables().len(), 2);

        let steps: Vec<_> = plan.steps().collect();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].operation().table(), Some(nodes.as_str()));
        assert_eq!(steps[0].operation().columns(), ["id", "label"]);
        assert_eq!(steps[1].operation().table(), Some(nodes.as_str()));
        assert_eq!(steps[1].operation().columns(), ["parent_id"]);
        assert!(steps[1].dependencies().contains(&steps[0].id()));
        assert_eq!(steps[2].operation().table(), Some(edges.as_str()));
        assert_eq!(steps[2].dependencies(), &BTreeSet::from([steps[0].id()]));
    }

    #[test]
    fn test_no_operations_is_an_empty_plan() {
        let mut state = state(single_table(), vec![]);
        let plan = GreedyMigrationPlanner::new()
            .create_plan(&mut state, "root", "root")
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_data_operations_are_rejected() {
        let mut state = state(
            single_table(),
            vec![("v1", SchemaOperation::execute("DELETE FROM test").unwrap())],
        );
        let err = GreedyMigrationPlanner::new()
            .create_plan(&mut state, "root", "v1")
            .unwrap_err();
        assert!(err.is_argument_error());
        assert!(!state.ref_log.contains_version("v1"));
    }

    #[test]
    fn test_backwards_has_no_path() {
        let mut state = state(
            single_table(),
            vec![("v1", SchemaOperation::drop_column("test", "name").unwrap())],
        );
        let err = GreedyMigrationPlanner::new()
            .create_plan(&mut state, "v1", "root")
            .unwrap_err();
        assert!(matches!(err, Error::NoPath { .. }));
    }
}
