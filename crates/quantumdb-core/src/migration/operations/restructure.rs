//! Operations deriving new tables from existing ones: merge, join,
//! partition and decompose.
//!
//! The source tables stay in the version. Every derived column is based on
//! the columns it takes its data from, and each source gets a data mapping
//! into the derived table.

use super::MigrationContext;
use crate::catalog::{Column, Hint, Table};
use crate::error::{Error, Result};
use crate::migration::data_mapping::Transformation;
use crate::schema::{DecomposeTable, JoinTable, PartitionTable};
use crate::versioning::{ColumnRefId, NewColumnRef};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A source table and the `(source column, target column)` pairs it feeds.
struct Input {
    table: String,
    columns: Vec<(String, String)>,
}

impl Input {
    fn unchanged(table: &str, columns: &[String]) -> Self {
        Self {
            table: table.to_string(),
            columns: columns.iter().map(|c| (c.clone(), c.clone())).collect(),
        }
    }
}

pub(super) fn merge(
    context: &mut MigrationContext<'_>,
    left: &str,
    right: &str,
    target: &str,
) -> Result<()> {
    let left_id = context.table_id(left)?;
    let right_id = context.table_id(right)?;
    let left_table = context.catalog.table(&left_id)?;
    let right_table = context.catalog.table(&right_id)?;

    let left_columns: BTreeSet<String> = left_table.column_names().into_iter().collect();
    let right_columns: BTreeSet<String> = right_table.column_names().into_iter().collect();
    if left_columns != right_columns {
        return Err(Error::invalid_argument(format!(
            "Tables: {} and {} cannot be merged, their columns differ",
            left, right
        )));
    }

    let columns = left_table.columns().to_vec();
    let names = left_table.column_names();
    let inputs = [Input::unchanged(left, &names), Input::unchanged(right, &names)];
    derive(context, target, columns, &left_id, &inputs)?;
    Ok(())
}

pub(super) fn join(context: &mut MigrationContext<'_>, operation: &JoinTable) -> Result<()> {
    let target = operation
        .target
        .as_deref()
        .ok_or_else(|| Error::invalid_argument("You must specify a target table to join into."))?;

    let mut columns: Vec<Column> = Vec::new();
    let mut inputs = Vec::with_capacity(operation.aliases.len());
    for (position, alias) in operation.aliases.iter().enumerate() {
        let source = operation.source_tables.get(alias).ok_or_else(|| {
            Error::invalid_argument(format!("Unknown alias: {}", alias))
        })?;
        let source_id = context.table_id(source)?;
        let table = context.catalog.table(&source_id)?;

        let selected = operation.source_columns.get(alias).cloned().unwrap_or_default();
        for name in &selected {
            if columns.iter().any(|column| column.name == *name) {
                return Err(Error::invalid_argument(format!(
                    "Column: {} is selected more than once",
                    name
                )));
            }
            let mut column = table.require_column(name)?.clone();
            // Rows of the join are identified by the first source only.
            if position > 0 {
                column.drop_hint(Hint::Identity);
            }
            columns.push(column);
        }
        inputs.push(Input::unchanged(source, &selected));
    }

    let first = operation
        .aliases
        .first()
        .and_then(|alias| operation.source_tables.get(alias))
        .ok_or_else(|| Error::invalid_argument("You must join at least one table."))?;
    let first_id = context.table_id(first)?;
    derive(context, target, columns, &first_id, &inputs)?;
    Ok(())
}

pub(super) fn partition(context: &mut MigrationContext<'_>, operation: &PartitionTable) -> Result<()> {
    let source_id = context.table_id(&operation.table)?;
    let source = context.catalog.table(&source_id)?;
    let columns = source.columns().to_vec();
    let names = source.column_names();

    for (target, expression) in &operation.partitions {
        let inputs = [Input::unchanged(&operation.table, &names)];
        let table_id = derive(context, target, columns.clone(), &source_id, &inputs)?;
        debug!(%target, %table_id, %expression, "Planned partition");
    }
    Ok(())
}

pub(super) fn decompose(context: &mut MigrationContext<'_>, operation: &DecomposeTable) -> Result<()> {
    let source_id = context.table_id(&operation.table)?;
    let source = context.catalog.table(&source_id)?;

    let mut decompositions = Vec::with_capacity(operation.decompositions.len());
    for (target, selected) in &operation.decompositions {
        for name in selected {
            source.require_column(name)?;
        }
        let columns: Vec<Column> = source
            .columns()
            .iter()
            .filter(|column| column.is_identity() || selected.contains(&column.name))
            .cloned()
            .collect();
        decompositions.push((target.clone(), columns));
    }

    for (target, columns) in decompositions {
        let names: Vec<String> = columns.iter().map(|column| column.name.clone()).collect();
        let inputs = [Input::unchanged(&operation.table, &names)];
        derive(context, &target, columns, &source_id, &inputs)?;
    }
    Ok(())
}

/// Create `target` at the context's version from `columns`, fed by `inputs`.
///
/// Keys of `key_source` whose columns all survive are carried over, with
/// self references pointing at the new table.
fn derive(
    context: &mut MigrationContext<'_>,
    target: &str,
    columns: Vec<Column>,
    key_source: &str,
    inputs: &[Input],
) -> Result<String> {
    context.require_absent(target)?;
    let table_id = context.next_table_id(target)?;
    let version = context.version_id().to_string();

    let mut table = columns.into_iter().fold(Table::new(&table_id), Table::with_column);
    for foreign_key in context.catalog.table(key_source)?.foreign_keys() {
        let referencing_kept = foreign_key
            .referencing_columns
            .iter()
            .all(|column| table.contains_column(column));
        if !referencing_kept {
            continue;
        }
        if foreign_key.is_self_referencing() {
            let referred_kept = foreign_key
                .referred_columns
                .iter()
                .all(|column| table.contains_column(column));
            if referred_kept {
                table.push_foreign_key(foreign_key.retarget(&table_id, &table_id));
            }
        } else {
            table.push_foreign_key(foreign_key.retarget(&table_id, &foreign_key.referred_table));
        }
    }
    let names = table.column_names();
    context.catalog.add_table(table)?;

    let mut ancestry: BTreeMap<&str, Vec<ColumnRefId>> = BTreeMap::new();
    let mut based_on = BTreeSet::new();
    for input in inputs {
        let source_ref = context.table_ref(&input.table)?;
        based_on.insert(context.table_id(&input.table)?);
        for (source_column, target_column) in &input.columns {
            if let Some(column) = context.ref_log.find_column(source_ref, source_column) {
                ancestry.entry(target_column.as_str()).or_default().push(column);
            }
        }
    }
    let column_refs = names
        .iter()
        .map(|name| {
            NewColumnRef::new(name.clone())
                .based_on(ancestry.remove(name.as_str()).unwrap_or_default())
        })
        .collect();
    context.ref_log.add_table(&version, target, &table_id, column_refs)?;
    context
        .table_mapping
        .derive(&version, target, &table_id, based_on);

    for input in inputs {
        let source_id = context.table_id(&input.table)?;
        for (source_column, target_column) in &input.columns {
            context.data_mappings.add(
                &source_id,
                source_column,
                &table_id,
                target_column,
                Transformation::identity(),
            )?;
        }
    }

    debug!(%target, %table_id, %version, sources = inputs.len(), "Derived table");
    Ok(table_id)
}
