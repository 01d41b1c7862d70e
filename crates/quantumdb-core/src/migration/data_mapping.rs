//! Column-level data mappings between physical tables and their transitive closure.

use super::traverser::Direction;
use crate::error::{require_non_empty, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use tracing::trace;

/// A value conversion applied while moving a column's data.
///
/// Transformations are sequences of conversion steps. The empty sequence is
/// the identity, and composing two transformations concatenates their steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transformation {
    steps: Vec<String>,
}

impl Transformation {
    /// The no-op transformation.
    pub fn identity() -> Self {
        Self::default()
    }

    /// A single conversion step, such as a cast expression.
    pub fn step(expression: impl Into<String>) -> Self {
        Self {
            steps: vec![expression.into()],
        }
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// This transformation followed by `next`.
    pub fn apply(&self, next: &Transformation) -> Transformation {
        let mut steps = self.steps.clone();
        steps.extend(next.steps.iter().cloned());
        Transformation { steps }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            write!(f, "identity")
        } else {
            write!(f, "{}", self.steps.join(" -> "))
        }
    }
}

/// Target column and the transformation producing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub column: String,
    pub transformation: Transformation,
}

impl ColumnMapping {
    pub fn new(column: impl Into<String>, transformation: Transformation) -> Self {
        Self {
            column: column.into(),
            transformation,
        }
    }
}

/// Column mappings from one physical table to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMapping {
    source_table: String,
    target_table: String,
    columns: BTreeMap<String, ColumnMapping>,
}

impl DataMapping {
    pub fn new(source_table: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            columns: BTreeMap::new(),
        }
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    /// Source column name to target column mapping.
    pub fn column_mappings(&self) -> &BTreeMap<String, ColumnMapping> {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn set_column_mapping(
        &mut self,
        source_column: &str,
        target_column: &str,
        transformation: Transformation,
    ) -> Result<&mut Self> {
        require_non_empty(source_column, "sourceColumnName")?;
        require_non_empty(target_column, "targetColumnName")?;
        self.columns.insert(
            source_column.to_string(),
            ColumnMapping::new(target_column, transformation),
        );
        Ok(self)
    }

    /// Forget the mapping of a source column. Returns whether one existed.
    pub fn drop(&mut self, source_column: &str) -> bool {
        self.columns.remove(source_column).is_some()
    }

    /// The same mapping read from target to source.
    pub fn copy_and_inverse(&self) -> DataMapping {
        DataMapping {
            source_table: self.target_table.clone(),
            target_table: self.source_table.clone(),
            columns: self
                .columns
                .iter()
                .map(|(source, mapping)| {
                    (
                        mapping.column.clone(),
                        ColumnMapping::new(source.clone(), mapping.transformation.clone()),
                    )
                })
                .collect(),
        }
    }
}

/// Registry of all declared data mappings, indexed by source then target table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMappings {
    mappings: BTreeMap<String, BTreeMap<String, DataMapping>>,
}

impl DataMappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `source_table.source_column` feeds `target_table.target_column`.
    pub fn add(
        &mut self,
        source_table: &str,
        source_column: &str,
        target_table: &str,
        target_column: &str,
        transformation: Transformation,
    ) -> Result<()> {
        require_non_empty(source_table, "sourceTable")?;
        require_non_empty(source_column, "sourceColumnName")?;
        require_non_empty(target_table, "targetTable")?;
        require_non_empty(target_column, "targetColumnName")?;

        self.mappings
            .entry(source_table.to_string())
            .or_default()
            .entry(target_table.to_string())
            .or_insert_with(|| DataMapping::new(source_table, target_table))
            .set_column_mapping(source_column, target_column, transformation)?;
        Ok(())
    }

    pub fn get(&self, source_table: &str, target_table: &str) -> Option<&DataMapping> {
        self.mappings.get(source_table)?.get(target_table)
    }

    /// Every declared mapping.
    pub fn iter(&self) -> impl Iterator<Item = &DataMapping> {
        self.mappings.values().flat_map(|targets| targets.values())
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.values().all(BTreeMap::is_empty)
    }

    /// Remove every mapping reading from or writing to `table`.
    pub fn drop(&mut self, table: &str) {
        self.mappings.remove(table);
        for targets in self.mappings.values_mut() {
            targets.remove(table);
        }
        self.mappings.retain(|_, targets| !targets.is_empty());
    }

    /// Remove a column from every mapping it takes part in.
    pub fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        require_non_empty(table, "table")?;
        require_non_empty(column, "columnName")?;

        if let Some(targets) = self.mappings.get_mut(table) {
            for mapping in targets.values_mut() {
                mapping.drop(column);
            }
        }
        for targets in self.mappings.values_mut() {
            if let Some(mapping) = targets.get_mut(table) {
                mapping.columns.retain(|_, target| target.column != column);
            }
        }
        Ok(())
    }

    /// Rename a column everywhere it appears as a source or a target.
    pub fn rename_column(&mut self, table: &str, old_name: &str, new_name: &str) -> Result<()> {
        require_non_empty(table, "table")?;
        require_non_empty(old_name, "columnName")?;
        require_non_empty(new_name, "newColumnName")?;

        if let Some(targets) = self.mappings.get_mut(table) {
            for mapping in targets.values_mut() {
                if let Some(column) = mapping.columns.remove(old_name) {
                    mapping.columns.insert(new_name.to_string(), column);
                }
            }
        }
        for targets in self.mappings.values_mut() {
            if let Some(mapping) = targets.get_mut(table) {
                for target in mapping.columns.values_mut() {
                    if target.column == old_name {
                        target.column = new_name.to_string();
                    }
                }
            }
        }
        Ok(())
    }

    /// Edges leaving `table` in the given direction, oriented away from it.
    fn oriented(&self, table: &str, direction: Direction) -> Vec<DataMapping> {
        match direction {
            Direction::Forwards => self
                .mappings
                .get(table)
                .map(|targets| targets.values().cloned().collect())
                .unwrap_or_default(),
            Direction::Backwards => self
                .mappings
                .values()
                .filter_map(|targets| targets.get(table))
                .map(DataMapping::copy_and_inverse)
                .collect(),
        }
    }

    /// Compose chains of mappings starting at `table` into one mapping per
    /// reachable terminal table.
    ///
    /// Tables only passed through on the way to another table are left out of
    /// the result. Paths meeting at the same terminal table are merged.
    pub fn get_transitive_data_mappings(
        &self,
        table: &str,
        direction: Direction,
    ) -> Result<Vec<DataMapping>> {
        require_non_empty(table, "table")?;

        let mut accumulated: BTreeMap<String, DataMapping> = BTreeMap::new();
        let mut intermediate: BTreeSet<String> = BTreeSet::new();
        let mut processed: BTreeSet<(String, String)> = BTreeSet::new();
        let mut frontier: VecDeque<DataMapping> = self.oriented(table, direction).into();

        while let Some(edge) = frontier.pop_front() {
            let source = edge.source_table.clone();
            let target = edge.target_table.clone();
            if source == target || target == table {
                continue;
            }

            let first_degree = source == table;
            let incoming: Vec<(String, ColumnMapping)> = if first_degree {
                edge.columns
                    .iter()
                    .map(|(column, mapping)| (column.clone(), mapping.clone()))
                    .collect()
            } else {
                intermediate.insert(source.clone());
                let Some(so_far) = accumulated.get(&source) else {
                    continue;
                };
                so_far
                    .columns
                    .iter()
                    .filter_map(|(origin, reached)| {
                        let hop = edge.columns.get(&reached.column)?;
                        Some((
                            origin.clone(),
                            ColumnMapping::new(
                                hop.column.clone(),
                                reached.transformation.apply(&hop.transformation),
                            ),
                        ))
                    })
                    .collect()
            };

            let result = accumulated
                .entry(target.clone())
                .or_insert_with(|| DataMapping::new(table, target.clone()));
            let mut gained = false;
            for (origin, mapping) in incoming {
                if !result.columns.contains_key(&origin) {
                    result.columns.insert(origin, mapping);
                    gained = true;
                }
            }

            let first_visit = processed.insert((source.clone(), target.clone()));
            trace!(%source, %target, first_degree, gained, "Processed data mapping edge");
            if gained || first_visit {
                frontier.extend(self.oriented(&target, direction));
            }
        }

        Ok(accumulated
            .into_iter()
            .filter(|(target, _)| !intermediate.contains(target))
            .map(|(_, mapping)| mapping)
            .collect())
    }
}
