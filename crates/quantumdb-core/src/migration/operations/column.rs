//! Column-level operations, applied to a ghost of the table.

use super::mirror::mirror;
use super::MigrationContext;
use crate::error::{check_state, Result};
use crate::migration::data_mapping::Transformation;
use crate::schema::{AlterColumn, ColumnDefinition};
use crate::versioning::NewColumnRef;

pub(super) fn add(context: &mut MigrationContext<'_>, table: &str, column: &ColumnDefinition) -> Result<()> {
    let current = context.parent_table_id(table)?;
    check_state(!context.catalog.table(&current)?.contains_column(&column.name), || {
        format!("Table: {} already contains a column: {}", table, column.name)
    })?;

    mirror(context, &[table])?;
    let ghost = context.table_id(table)?;
    context.catalog.table_mut(&ghost)?.add_column(column.create_column())?;

    let table_ref = context.table_ref(table)?;
    context
        .ref_log
        .add_column(table_ref, NewColumnRef::new(column.name.clone()))?;
    Ok(())
}

pub(super) fn drop(context: &mut MigrationContext<'_>, table: &str, column: &str) -> Result<()> {
    let current = context.parent_table_id(table)?;
    context.catalog.table(&current)?.require_column(column)?;

    mirror(context, &[table])?;
    let ghost = context.table_id(table)?;
    context.catalog.remove_column(&ghost, column)?;

    let table_ref = context.table_ref(table)?;
    context.ref_log.drop_column(table_ref, column)?;
    context.data_mappings.drop_column(&ghost, column)?;
    Ok(())
}

pub(super) fn alter(context: &mut MigrationContext<'_>, operation: &AlterColumn) -> Result<()> {
    let table = operation.table.as_str();
    let current = context.parent_table_id(table)?;
    let original = context.catalog.table(&current)?;
    original.require_column(&operation.column)?;
    if let Some(new_name) = &operation.new_name {
        check_state(!original.contains_column(new_name), || {
            format!("Table: {} already contains a column: {}", table, new_name)
        })?;
    }

    mirror(context, &[table])?;
    let ghost = context.table_id(table)?;

    let mut name = operation.column.clone();
    if let Some(new_name) = &operation.new_name {
        context.catalog.rename_column(&ghost, &name, new_name)?;
        let table_ref = context.table_ref(table)?;
        context.ref_log.rename_column(table_ref, &name, new_name)?;
        context.data_mappings.rename_column(&ghost, &name, new_name)?;
        name = new_name.clone();
    }

    let column = context.catalog.table_mut(&ghost)?.require_column_mut(&name)?;
    for hint in &operation.hints_to_drop {
        column.drop_hint(*hint);
    }
    for hint in &operation.hints_to_add {
        column.add_hint(*hint);
    }
    if operation.drop_default {
        column.drop_default_value();
    }
    if let Some(expression) = &operation.new_default {
        column.modify_default_value(expression.clone());
    }

    if let Some(column_type) = operation.new_type {
        column.modify_type(column_type);
        context.data_mappings.add(
            &current,
            &operation.column,
            &ghost,
            &name,
            Transformation::step(format!("CAST(? AS {})", column_type)),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, Column, ColumnType, Hint, Table};
    use crate::migration::{Direction, SchemaOperationsMigrator};
    use crate::schema::{ColumnDefinition, SchemaOperation};
    use crate::versioning::{ChangeSet, Changelog, CurrentVersion, State};

    fn state_with(operation: SchemaOperation) -> State {
        let mut catalog = Catalog::new("crm");
        catalog
            .add_table(
                Table::new("customers")
                    .with_column(Column::new("id", ColumnType::Int8).with_hint(Hint::Identity))
                    .with_column(Column::new("name", ColumnType::Varchar(64)))
                    .with_column(Column::new("age", ColumnType::Int2)),
            )
            .unwrap();

        let mut changelog = Changelog::with_root("root").unwrap();
        let mut current = CurrentVersion::new("root");
        changelog
            .add_version(&mut current, "v1", ChangeSet::new("test", None).unwrap(), operation)
            .unwrap();
        State::bootstrap(catalog, changelog).unwrap()
    }

    fn ghost(state: &State) -> String {
        state.table_mapping.get_table_id("v1", "customers").unwrap().to_string()
    }

    #[test]
    fn test_add_existing_column_fails_before_mirroring() {
        let column = ColumnDefinition::new("name", ColumnType::Text).unwrap();
        let mut state = state_with(SchemaOperation::add_column("customers", column).unwrap());
        assert!(SchemaOperationsMigrator::migrate(&mut state, "v1").is_err());
        assert_eq!(state.catalog.tables().count(), 1);
    }

    #[test]
    fn test_drop_column() {
        let mut state = state_with(SchemaOperation::drop_column("customers", "age").unwrap());
        SchemaOperationsMigrator::migrate(&mut state, "v1").unwrap();

        let ghost = ghost(&state);
        assert!(!state.catalog.table(&ghost).unwrap().contains_column("age"));
        let mapping = state.data_mappings.get("customers", &ghost).unwrap();
        assert!(!mapping.column_mappings().contains_key("age"));
        assert_eq!(mapping.column_mappings().len(), 2);
    }

    #[test]
    fn test_rename_column_rekeys_mapping() {
        let operation = SchemaOperation::alter_column("customers", "name")
            .unwrap()
            .rename("full_name")
            .unwrap()
            .build()
            .unwrap();
        let mut state = state_with(operation);
        SchemaOperationsMigrator::migrate(&mut state, "v1").unwrap();

        let ghost = ghost(&state);
        assert!(state.catalog.table(&ghost).unwrap().contains_column("full_name"));

        let results = state
            .data_mappings
            .get_transitive_data_mappings("customers", Direction::Forwards)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].column_mappings()["name"].column, "full_name");

        let table_ref = state.ref_log.get_table_ref("v1", "customers").unwrap().id();
        assert!(state.ref_log.find_column(table_ref, "full_name").is_some());
    }

    #[test]
    fn test_retype_adds_cast() {
        let operation = SchemaOperation::alter_column("customers", "age")
            .unwrap()
            .modify_data_type(ColumnType::Int4)
            .add_hint(Hint::NotNull)
            .build()
            .unwrap();
        let mut state = state_with(operation);
        SchemaOperationsMigrator::migrate(&mut state, "v1").unwrap();

        let ghost = ghost(&state);
        let column = state.catalog.table(&ghost).unwrap().column("age").unwrap().clone();
        assert_eq!(column.column_type, ColumnType::Int4);
        assert!(column.is_not_null());

        let mapping = state.data_mappings.get("customers", &ghost).unwrap();
        assert!(!mapping.column_mappings()["age"].transformation.is_identity());
    }
}
