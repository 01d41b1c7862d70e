//! Table-level operations: create, drop, copy and rename.

use super::MigrationContext;
use crate::catalog::Table;
use crate::error::{check_state, Result};
use crate::schema::CreateTable;
use crate::versioning::NewColumnRef;
use tracing::debug;

pub(super) fn create(context: &mut MigrationContext<'_>, operation: &CreateTable) -> Result<()> {
    context.require_absent(&operation.table)?;
    let table_id = context.next_table_id(&operation.table)?;

    let table = operation
        .columns
        .iter()
        .fold(Table::new(&table_id), |table, column| {
            table.with_column(column.create_column())
        });
    context.catalog.add_table(table)?;

    let version = context.version_id().to_string();
    let columns = operation
        .columns
        .iter()
        .map(|column| NewColumnRef::new(column.name.clone()))
        .collect();
    context
        .ref_log
        .add_table(&version, &operation.table, &table_id, columns)?;
    context.table_mapping.add(&version, &operation.table, &table_id);

    debug!(table = %operation.table, %table_id, %version, "Created table");
    Ok(())
}

/// Remove a logical table from the version. The physical table stays for
/// the versions that still use it.
pub(super) fn drop(context: &mut MigrationContext<'_>, table: &str) -> Result<()> {
    let table_id = context.table_id(table)?;
    let version = context.version_id().to_string();

    let referencing: Vec<String> = context
        .table_mapping
        .get_table_ids(&version)
        .into_iter()
        .filter(|other| *other != table_id)
        .filter(|other| {
            context
                .catalog
                .get_table(other)
                .is_some_and(|other| other.references_table(&table_id))
        })
        .collect();
    check_state(referencing.is_empty(), || {
        format!(
            "The table: {} is still being referenced by: {:?} at version: {}",
            table, referencing, version
        )
    })?;

    context.ref_log.drop_table(&version, table)?;
    context.table_mapping.remove(&version, table)?;
    Ok(())
}

/// Create a new logical table holding a copy of `source`.
pub(super) fn copy(context: &mut MigrationContext<'_>, source: &str, target: &str) -> Result<()> {
    let source_id = context.table_id(source)?;
    context.require_absent(target)?;
    let table_id = context.next_table_id(target)?;
    let version = context.version_id().to_string();

    let original = context.catalog.table(&source_id)?;
    let mut copy = original.copy_as(&table_id);
    for foreign_key in original.foreign_keys() {
        let referred = if foreign_key.is_self_referencing() {
            table_id.clone()
        } else {
            foreign_key.referred_table.clone()
        };
        copy.push_foreign_key(foreign_key.retarget(&table_id, &referred));
    }
    let columns = copy.column_names();
    context.catalog.add_table(copy)?;

    let source_ref = context.table_ref(source)?;
    let column_refs = context
        .ref_log
        .table_ref(source_ref)?
        .columns()
        .iter()
        .map(|column| {
            let name = context.ref_log.column_ref(*column)?.name();
            Ok(NewColumnRef::new(name).based_on([*column]))
        })
        .collect::<Result<Vec<_>>>()?;
    context.ref_log.add_table(&version, target, &table_id, column_refs)?;
    context.table_mapping.copy(&version, source, target, &table_id)?;
    context.map_columns(&source_id, &table_id, &columns)?;

    debug!(%source, %target, %table_id, %version, "Copied table");
    Ok(())
}

/// Rename the logical table only; the physical table is reused.
pub(super) fn rename(context: &mut MigrationContext<'_>, table: &str, new_name: &str) -> Result<()> {
    context.table_id(table)?;
    context.require_absent(new_name)?;
    let version = context.version_id().to_string();

    context.ref_log.rename_table(&version, table, new_name)?;
    context.table_mapping.rename(&version, table, new_name)?;
    Ok(())
}
