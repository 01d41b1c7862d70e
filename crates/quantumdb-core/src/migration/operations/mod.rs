//! Expansion of schema operations into ghost tables.
//!
//! Each version's operation is applied to the catalog, the RefLog, the
//! TableMapping and the data mappings. Tables touched by an operation are
//! never altered in place: they are mirrored into fresh physical tables for
//! the new version while the old physical tables keep serving the parent.

mod column;
mod foreign_key;
mod mirror;
mod restructure;
mod table;

use super::data_mapping::{DataMappings, Transformation};
use crate::catalog::Catalog;
use crate::error::{check_state, Error, Result};
use crate::schema::SchemaOperation;
use crate::versioning::{id, RefLog, State, TableMapping, TableRefId, Version};
use tracing::debug;

/// Applies the operation of one version to a [`State`].
pub struct SchemaOperationsMigrator;

impl SchemaOperationsMigrator {
    /// Expand `version` on top of its parent.
    ///
    /// The parent must already be present in the RefLog. On failure every
    /// model is left as it was before the call.
    pub fn migrate(state: &mut State, version: &str) -> Result<()> {
        let State {
            catalog,
            changelog,
            ref_log,
            table_mapping,
            data_mappings,
        } = state;

        let version = changelog.get_version(version)?;
        let operation = version.operation().ok_or_else(|| {
            Error::invalid_argument(format!(
                "Version: {} has no operation to migrate",
                version.id()
            ))
        })?;
        let parent = version
            .parent()
            .ok_or_else(|| Error::invalid_argument("You cannot migrate to a root version!"))?;
        check_state(!ref_log.contains_version(version.id()), || {
            format!("Version: {} has already been expanded", version.id())
        })?;

        let backup = (
            catalog.clone(),
            ref_log.clone(),
            table_mapping.clone(),
            data_mappings.clone(),
        );
        let mut context = MigrationContext {
            catalog: &mut *catalog,
            ref_log: &mut *ref_log,
            table_mapping: &mut *table_mapping,
            data_mappings: &mut *data_mappings,
            version,
        };
        debug!(version = %version.id(), %operation, "Expanding schema operation");

        let result = Self::expand(&mut context, parent, operation);
        if result.is_err() {
            (*catalog, *ref_log, *table_mapping, *data_mappings) = backup;
        }
        result
    }

    fn expand(
        context: &mut MigrationContext<'_>,
        parent: &str,
        operation: &SchemaOperation,
    ) -> Result<()> {
        context.ref_log.fork(context.version)?;
        context
            .table_mapping
            .copy_mapping_from_parent(context.version.id(), parent);

        match operation {
            SchemaOperation::CreateTable(op) => table::create(context, op),
            SchemaOperation::DropTable { table } => table::drop(context, table),
            SchemaOperation::CopyTable { source, target } => table::copy(context, source, target),
            SchemaOperation::RenameTable { table, new_name } => table::rename(context, table, new_name),
            SchemaOperation::AddColumn { table, column } => column::add(context, table, column),
            SchemaOperation::DropColumn { table, column } => column::drop(context, table, column),
            SchemaOperation::AlterColumn(op) => column::alter(context, op),
            SchemaOperation::AddForeignKey {
                table,
                columns,
                referred_table,
                referred_columns,
                name,
            } => foreign_key::add(context, table, columns, referred_table, referred_columns, name),
            SchemaOperation::DropForeignKey { table, name } => foreign_key::drop(context, table, name),
            SchemaOperation::MergeTable { left, right, target } => {
                restructure::merge(context, left, right, target)
            }
            SchemaOperation::JoinTable(op) => restructure::join(context, op),
            SchemaOperation::PartitionTable(op) => restructure::partition(context, op),
            SchemaOperation::DecomposeTable(op) => restructure::decompose(context, op),
            // Data statements leave the schema untouched.
            SchemaOperation::Execute { .. } => Ok(()),
        }
    }
}

/// Mutable view of the models one operation expands.
pub(crate) struct MigrationContext<'a> {
    pub catalog: &'a mut Catalog,
    pub ref_log: &'a mut RefLog,
    pub table_mapping: &'a mut TableMapping,
    pub data_mappings: &'a mut DataMappings,
    pub version: &'a Version,
}

impl MigrationContext<'_> {
    fn version_id(&self) -> &str {
        self.version.id()
    }

    fn parent_id(&self) -> Result<&str> {
        self.version
            .parent()
            .ok_or_else(|| Error::invalid_argument("You cannot migrate to a root version!"))
    }

    /// Physical id of a logical table at this version.
    fn table_id(&self, name: &str) -> Result<String> {
        Ok(self
            .table_mapping
            .get_table_id(self.version.id(), name)?
            .to_string())
    }

    /// Physical id of a logical table at the parent version.
    fn parent_table_id(&self, name: &str) -> Result<String> {
        Ok(self
            .table_mapping
            .get_table_id(self.parent_id()?, name)?
            .to_string())
    }

    fn table_ref(&self, name: &str) -> Result<TableRefId> {
        Ok(self.ref_log.get_table_ref(self.version.id(), name)?.id())
    }

    /// Reject a logical name already in use at this version.
    fn require_absent(&self, name: &str) -> Result<()> {
        check_state(
            !self
                .table_mapping
                .get_table_names(self.version.id())
                .contains(name),
            || {
                format!(
                    "Version: {} already contains a table named: {}",
                    self.version.id(),
                    name
                )
            },
        )
    }

    /// A physical id not used by the catalog, the RefLog or the TableMapping.
    fn next_table_id(&self, name: &str) -> Result<String> {
        let seed = format!("{}:{}", self.version.id(), name);
        let referenced = self.ref_log.all_table_ids();
        let mapped = self.table_mapping.all_table_ids();
        id::generate_table_id(&seed, |candidate| {
            self.catalog.contains_table(candidate)
                || referenced.contains(candidate)
                || mapped.contains(candidate)
        })
        .ok_or_else(|| Error::illegal_state(format!("Unable to generate a table id for: {}", name)))
    }

    /// Map the named columns of one physical table onto another unchanged.
    fn map_columns<'c>(
        &mut self,
        source: &str,
        target: &str,
        columns: impl IntoIterator<Item = &'c String>,
    ) -> Result<()> {
        for column in columns {
            self.data_mappings
                .add(source, column, target, column, Transformation::identity())?;
        }
        Ok(())
    }
}
