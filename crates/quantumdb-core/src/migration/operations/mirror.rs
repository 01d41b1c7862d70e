//! Transitive mirroring of tables into ghost tables.

use super::MigrationContext;
use crate::error::Result;
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

/// Ghost the named tables, and every table referencing a ghosted table, at
/// the context's version.
///
/// Returns the logical names of all mirrored tables. Foreign keys of each
/// ghost are re-pointed to the tables of the new version.
pub(super) fn mirror(context: &mut MigrationContext<'_>, tables: &[&str]) -> Result<BTreeSet<String>> {
    let parent = context.parent_id()?.to_string();
    let version = context.version_id().to_string();

    let mut mirrored = BTreeSet::new();
    let mut to_mirror: VecDeque<String> = tables.iter().map(|name| name.to_string()).collect();

    while let Some(name) = to_mirror.pop_front() {
        if mirrored.contains(&name) {
            continue;
        }

        let old_id = context.parent_table_id(&name)?;
        let new_id = context.next_table_id(&name)?;

        context.ref_log.replace_table(&version, &name, &name, &new_id)?;
        context.table_mapping.ghost(&version, &name, &new_id)?;

        let ghost = context.catalog.table(&old_id)?.copy_as(&new_id);
        let columns = ghost.column_names();
        context.catalog.add_table(ghost)?;
        context.map_columns(&old_id, &new_id, &columns)?;

        debug!(table = %name, from = %old_id, to = %new_id, %version, "Created ghost table");
        mirrored.insert(name);

        for referencing in context.catalog.tables_referencing(&old_id) {
            if let Ok(referencing_name) = context.table_mapping.get_table_name(&parent, &referencing) {
                to_mirror.push_back(referencing_name.to_string());
            }
        }
    }

    for name in &mirrored {
        let old_id = context.parent_table_id(name)?;
        let new_id = context.table_id(name)?;

        let outgoing = context.catalog.table(&old_id)?.foreign_keys().to_vec();
        for foreign_key in outgoing {
            let referred_name = context
                .table_mapping
                .get_table_name(&parent, &foreign_key.referred_table)?
                .to_string();
            let referred_id = context.table_id(&referred_name)?;
            context
                .catalog
                .table_mut(&new_id)?
                .push_foreign_key(foreign_key.retarget(&new_id, &referred_id));
        }
    }

    Ok(mirrored)
}
