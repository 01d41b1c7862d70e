//! Per-table bookkeeping of migrated columns while a plan is built.

use crate::catalog::Catalog;
use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};

/// How far the columns of a ghost table have been scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Partially,
    Done,
}

/// Tracks which columns of each ghost table are already copied by a step.
#[derive(Debug, Clone, Default)]
pub struct MigrationProgress {
    columns: BTreeMap<String, Vec<String>>,
    migrated: BTreeMap<String, BTreeSet<String>>,
}

impl MigrationProgress {
    /// Track the given tables of the catalog.
    pub fn new<'a>(catalog: &Catalog, tables: impl IntoIterator<Item = &'a String>) -> Result<Self> {
        let mut columns = BTreeMap::new();
        for table in tables {
            columns.insert(table.clone(), catalog.table(table)?.column_names());
        }
        Ok(Self {
            columns,
            migrated: BTreeMap::new(),
        })
    }

    pub fn progress(&self, table: &str) -> Progress {
        let migrated = match self.migrated.get(table) {
            Some(migrated) if !migrated.is_empty() => migrated,
            _ => return Progress::Pending,
        };
        let complete = self
            .columns
            .get(table)
            .is_some_and(|columns| columns.iter().all(|column| migrated.contains(column)));
        if complete {
            Progress::Done
        } else {
            Progress::Partially
        }
    }

    pub fn mark_columns_as_migrated<'a>(
        &mut self,
        table: &str,
        columns: impl IntoIterator<Item = &'a String>,
    ) {
        self.migrated
            .entry(table.to_string())
            .or_default()
            .extend(columns.into_iter().cloned());
    }

    pub fn partially_migrated_tables(&self) -> Vec<String> {
        self.started(Progress::Partially)
    }

    pub fn migrated_tables(&self) -> Vec<String> {
        self.started(Progress::Done)
    }

    /// Columns of `table` not yet copied by any step, in table order.
    pub fn yet_to_be_migrated_columns(&self, table: &str) -> Vec<String> {
        let migrated = self.migrated.get(table);
        self.columns
            .get(table)
            .map(|columns| {
                columns
                    .iter()
                    .filter(|column| !migrated.is_some_and(|done| done.contains(*column)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn started(&self, progress: Progress) -> Vec<String> {
        self.migrated
            .keys()
            .filter(|table| self.progress(table) == progress)
            .cloned()
            .collect()
    }
}
