//! Drives a database from one version to another.
//!
//! Migrating is additive: the tables of the source version keep serving it
//! while ghost tables for the target are created, kept in sync and
//! populated. Both versions stay live until one is dropped.

use super::operations::SchemaOperationsMigrator;
use super::record::{MigrationRecord, StepStatus};
use super::traverser::{Direction, Stage, StageKind, VersionTraverser};
use super::data_mapping::DataMapping;
use crate::backend::{self, Backend};
use crate::catalog::{Catalog, Table};
use crate::config::MigratorConfig;
use crate::error::{check_state, Error, Result};
use crate::planner::{GreedyMigrationPlanner, MigrationPlanner, Plan, PlanValidator};
use crate::schema::SchemaOperation;
use crate::versioning::{Changelog, RefLog, State};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Outcome of [`Migrator::migrate`].
#[derive(Debug, Clone)]
pub struct MigrationSummary {
    /// Hex id of the migration record, `None` when nothing had to be done.
    pub migration_id: Option<String>,
    pub from: String,
    pub to: String,
    /// Ghost tables populated across all stages.
    pub ghost_tables: BTreeSet<String>,
    /// Plans of the schema stages, in execution order.
    pub plans: Vec<Plan>,
    pub steps_executed: usize,
    pub statements_executed: usize,
    pub dry_run: bool,
}

impl MigrationSummary {
    fn new(from: &str, to: &str, dry_run: bool) -> Self {
        Self {
            migration_id: None,
            from: from.to_string(),
            to: to.to_string(),
            ghost_tables: BTreeSet::new(),
            plans: Vec::new(),
            steps_executed: 0,
            statements_executed: 0,
            dry_run,
        }
    }
}

/// Applies changelog versions to a backend.
pub struct Migrator<B: Backend + ?Sized = dyn Backend> {
    backend: Box<B>,
    config: MigratorConfig,
    planner: GreedyMigrationPlanner,
}

impl Migrator {
    /// Open the backend named by `config`.
    pub fn open(config: MigratorConfig) -> Result<Self> {
        let backend = backend::open(&config)?;
        Ok(Self::new(backend, config))
    }
}

impl<B: Backend + ?Sized> Migrator<B> {
    pub fn new(backend: Box<B>, config: MigratorConfig) -> Self {
        Self {
            backend,
            config,
            planner: GreedyMigrationPlanner::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Start tracking an existing database at the changelog's root.
    pub fn init(&mut self, catalog: Catalog, changelog: Changelog) -> Result<State> {
        check_state(self.backend.load_state()?.is_none(), || {
            "The database is already tracked".to_string()
        })?;
        let mut state = State::bootstrap(catalog, changelog)?;
        let root = state.changelog.root().id().to_string();
        state.ref_log.set_version_state(&root, true);
        if !self.config.dry_run {
            self.backend.persist_state(&state)?;
        }
        info!(version = %root, "Initialized database");
        Ok(state)
    }

    /// The persisted state.
    pub fn state(&self) -> Result<State> {
        self.backend
            .load_state()?
            .ok_or_else(|| Error::illegal_state("The database is not tracked yet"))
    }

    /// Replace the persisted state, e.g. after appending to its changelog.
    pub fn save_state(&mut self, state: &State) -> Result<()> {
        self.backend.persist_state(state)
    }

    /// Take the database from version `from` to version `to`.
    pub fn migrate(&mut self, from: &str, to: &str) -> Result<MigrationSummary> {
        let state = self.state()?;
        let dry_run = self.config.dry_run;
        if state.ref_log.versions().contains(to) {
            warn!(version = %to, "Database is already at the requested version");
            return Ok(MigrationSummary::new(from, to, dry_run));
        }

        let stages = VersionTraverser::verify_path_and_state(&state, from, to)?;
        info!(%from, %to, stages = stages.len(), dry_run, "Migrating");

        let mut record = MigrationRecord::new(from, to);
        record.start();
        self.save_record(&record)?;

        let mut summary = MigrationSummary::new(from, to, dry_run);
        summary.migration_id = Some(record.id());

        let mut working = state;
        match self.run(&mut working, &stages, &mut record, &mut summary) {
            Ok(()) => {
                working.ref_log.set_version_state(to, true);
                if !dry_run {
                    self.backend.persist_state(&working)?;
                }
                record.complete();
                self.save_record(&record)?;
                info!(
                    %from,
                    %to,
                    steps = summary.steps_executed,
                    ghost_tables = summary.ghost_tables.len(),
                    "Migration complete"
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(%from, %to, error = %e, "Migration failed");
                record.fail(e.to_string());
                self.save_record(&record)?;
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        state: &mut State,
        stages: &[Stage],
        record: &mut MigrationRecord,
        summary: &mut MigrationSummary,
    ) -> Result<()> {
        let mut created = BTreeSet::new();
        for stage in stages {
            debug!(kind = ?stage.kind(), first = stage.first(), last = stage.last(), "Running stage");
            match stage.kind() {
                StageKind::Ddl => {
                    let plan = self.planner.create_plan(state, stage.parent(), stage.last())?;
                    if self.config.validate_plans {
                        PlanValidator::validate(&plan, &state.catalog)?;
                    }
                    let plan = self.execute_plan(state, stage.parent(), plan, record, summary)?;
                    created.extend(plan.ghost_tables().iter().cloned());
                    summary.ghost_tables.extend(plan.ghost_tables().iter().cloned());
                    summary.plans.push(plan);
                }
                StageKind::Dml => {
                    for version in stage.versions() {
                        if !state.ref_log.contains_version(version) {
                            SchemaOperationsMigrator::migrate(state, version)?;
                        }
                        let operation = state.changelog.get_version(version)?.operation().cloned();
                        if let Some(SchemaOperation::Execute { statement }) = operation {
                            debug!(%version, %statement, "Executing data operation");
                            if !self.config.dry_run {
                                self.backend.execute(&statement)?;
                                summary.statements_executed += 1;
                            }
                        }
                    }
                }
            }
        }

        // Ghosts of earlier stages that the target no longer uses.
        let target = state.table_mapping.get_table_ids(&summary.to);
        let stale: Vec<String> = created.difference(&target).cloned().collect();
        if !stale.is_empty() {
            debug!(tables = ?stale, "Dropping intermediate tables");
            summary.ghost_tables.retain(|table| target.contains(table));
            if !self.config.dry_run {
                self.backend.drop_tables(&stale)?;
            }
        }
        Ok(())
    }

    /// Create the ghost tables of `plan`, sync them with the tables live at
    /// `live` and run every step.
    fn execute_plan(
        &mut self,
        state: &mut State,
        live: &str,
        mut plan: Plan,
        record: &mut MigrationRecord,
        summary: &mut MigrationSummary,
    ) -> Result<Plan> {
        let dry_run = self.config.dry_run;
        let ghosts = plan.ghost_tables().clone();
        if ghosts.is_empty() {
            return Ok(plan);
        }

        let tables = ghosts
            .iter()
            .map(|id| state.catalog.table(id).cloned())
            .collect::<Result<Vec<Table>>>()?;
        info!(tables = ?ghosts, "Creating ghost tables");
        if !dry_run {
            self.backend.create_tables(&tables)?;
        }

        let mut forwards = Vec::new();
        for table in state.table_mapping.get_table_ids(live) {
            for mapping in state
                .data_mappings
                .get_transitive_data_mappings(&table, Direction::Forwards)?
            {
                if ghosts.contains(mapping.target_table()) && !mapping.is_empty() {
                    forwards.push(mapping);
                }
            }
        }
        for mapping in &forwards {
            let backwards = mapping.copy_and_inverse();
            register_sync(&mut state.ref_log, mapping)?;
            register_sync(&mut state.ref_log, &backwards)?;
            if !dry_run {
                self.backend.install_data_mapping(mapping)?;
                self.backend.install_data_mapping(&backwards)?;
            }
        }

        while let Some(step) = plan.next_step() {
            let id = step.id();
            let operation = step.operation().clone();
            let description = operation.to_string();
            let mappings: Vec<DataMapping> = forwards
                .iter()
                .filter(|mapping| operation.covers(mapping.target_table()))
                .cloned()
                .collect();

            debug!(step = %description, mappings = mappings.len(), "Executing step");
            if dry_run {
                record.push_step(description, StepStatus::Skipped);
            } else if let Err(e) = self.backend.migrate_data(&operation, &mappings) {
                record.push_step(description, StepStatus::Failed);
                return Err(e);
            } else {
                record.push_step(description, StepStatus::Complete);
                summary.steps_executed += 1;
            }
            plan.mark_as_executed(id)?;
        }
        check_state(plan.is_executed(), || {
            "Some steps of the migration plan could not be executed".to_string()
        })?;
        Ok(plan)
    }

    /// Deactivate `version` and drop the physical tables no live version uses.
    ///
    /// Returns the dropped tables.
    pub fn drop_version(&mut self, version: &str) -> Result<Vec<String>> {
        let mut state = self.state()?;
        let active = state.ref_log.versions().clone();
        if !active.contains(version) {
            return Err(Error::invalid_argument(format!(
                "Version: {} is not live in the database",
                version
            )));
        }
        check_state(active.len() > 1, || {
            format!("Version: {} is the last live version and cannot be dropped", version)
        })?;

        state.ref_log.set_version_state(version, false);
        let in_use: BTreeSet<String> = state
            .ref_log
            .versions()
            .iter()
            .flat_map(|live| state.table_mapping.get_table_ids(live))
            .collect();
        let unused: Vec<String> = state
            .table_mapping
            .get_table_ids(version)
            .into_iter()
            .filter(|table| !in_use.contains(table))
            .collect();

        let mut stale_syncs = Vec::new();
        for (id, sync) in state.ref_log.syncs() {
            let source = state.ref_log.table_ref(sync.source())?.table_id();
            let target = state.ref_log.table_ref(sync.target())?.table_id();
            if unused.iter().any(|table| table == source || table == target) {
                stale_syncs.push(id);
            }
        }
        for sync in stale_syncs {
            state.ref_log.drop_sync(sync)?;
        }

        info!(%version, tables = ?unused, "Dropping version");
        if !self.config.dry_run {
            self.backend.drop_tables(&unused)?;
            self.backend.persist_state(&state)?;
        }
        Ok(unused)
    }

    /// The most recent migration record.
    pub fn status(&self) -> Result<Option<MigrationRecord>> {
        Ok(self.backend.records()?.pop())
    }

    /// Every migration record, oldest first.
    pub fn list_migrations(&self) -> Result<Vec<MigrationRecord>> {
        self.backend.records()
    }

    fn save_record(&mut self, record: &MigrationRecord) -> Result<()> {
        if self.config.dry_run {
            return Ok(());
        }
        self.backend.save_record(record)
    }
}

/// Declare `mapping` as a sync in the RefLog, once.
fn register_sync(ref_log: &mut RefLog, mapping: &DataMapping) -> Result<()> {
    let name = format!("sync_{}_{}", mapping.source_table(), mapping.target_table());
    if ref_log.syncs().any(|(_, sync)| sync.name() == name) {
        return Ok(());
    }

    let source = ref_log.get_table_ref_by_id(mapping.source_table())?.id();
    let target = ref_log.get_table_ref_by_id(mapping.target_table())?.id();
    let columns: Vec<_> = mapping
        .column_mappings()
        .iter()
        .filter_map(|(from, to)| {
            Some((
                ref_log.find_column(source, from)?,
                ref_log.find_column(target, &to.column)?,
            ))
        })
        .collect();
    if columns.is_empty() {
        return Ok(());
    }

    let function = format!("migrate_{}_to_{}", mapping.source_table(), mapping.target_table());
    ref_log.add_sync(&name, &function, columns)?;
    Ok(())
}
