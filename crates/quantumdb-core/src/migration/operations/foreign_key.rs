use super::mirror::mirror;
use super::MigrationContext;
use crate::catalog::ForeignKey;
use crate::error::{check_state, Result};

pub(super) fn add(
    context: &mut MigrationContext<'_>,
    table: &str,
    columns: &[String],
    referred_table: &str,
    referred_columns: &[String],
    name: &str,
) -> Result<()> {
    let current = context.parent_table_id(table)?;
    context.parent_table_id(referred_table)?;
    check_state(
        !context
            .catalog
            .table(&current)?
            .foreign_keys()
            .iter()
            .any(|fk| fk.name == name),
        || format!("Table: {} already has a foreign key named: {}", table, name),
    )?;

    mirror(context, &[table])?;
    let ghost = context.table_id(table)?;
    let referred = context.table_id(referred_table)?;

    context.catalog.add_foreign_key(
        ForeignKey::new(ghost, columns.iter().cloned(), referred, referred_columns.iter().cloned())
            .named(name),
    )
}

pub(super) fn drop(context: &mut MigrationContext<'_>, table: &str, name: &str) -> Result<()> {
    let current = context.parent_table_id(table)?;
    check_state(
        context
            .catalog
            .table(&current)?
            .foreign_keys()
            .iter()
            .any(|fk| fk.name == name),
        || format!("Table: {} has no foreign key named: {}", table, name),
    )?;

    mirror(context, &[table])?;
    let ghost = context.table_id(table)?;
    context.catalog.drop_foreign_key(&ghost, name)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::catalog::{Catalog, Column, ColumnType, Hint, Table};
    use crate::migration::SchemaOperationsMigrator;
    use crate::schema::SchemaOperation;
    use crate::versioning::{ChangeSet, Changelog, CurrentVersion, State};

    fn state_with(operations: Vec<(&str, SchemaOperation)>) -> State {
        let mut catalog = Catalog::new("library");
        catalog
            .add_table(
                Table::new("authors")
                    .with_column(Column::new("id", ColumnType::Int8).with_hint(Hint::Identity)),
            )
            .unwrap();
        catalog
            .add_table(
                Table::new("books")
                    .with_column(Column::new("id", ColumnType::Int8).with_hint(Hint::Identity))
                    .with_column(Column::new("author_id", ColumnType::Int8).with_hint(Hint::NotNull)),
            )
            .unwrap();

        let mut changelog = Changelog::with_root("root").unwrap();
        let mut current = CurrentVersion::new("root");
        for (id, operation) in operations {
            changelog
                .add_version(&mut current, id, ChangeSet::new("test", None).unwrap(), operation)
                .unwrap();
        }
        State::bootstrap(catalog, changelog).unwrap()
    }

    fn add_key() -> SchemaOperation {
        SchemaOperation::add_foreign_key("books", ["author_id"], "authors", ["id"]).unwrap()
    }

    #[test]
    fn test_add_and_drop_foreign_key() {
        let mut state = state_with(vec![
            ("v1", add_key()),
            (
                "v2",
                SchemaOperation::drop_foreign_key("books", "books_author_id_fkey").unwrap(),
            ),
        ]);
        SchemaOperationsMigrator::migrate(&mut state, "v1").unwrap();

        let books = state.table_mapping.get_table_id("v1", "books").unwrap().to_string();
        let key = &state.catalog.table(&books).unwrap().foreign_keys()[0];
        assert_eq!(key.referred_table, "authors");
        assert!(state.catalog.table("books").unwrap().foreign_keys().is_empty());

        SchemaOperationsMigrator::migrate(&mut state, "v2").unwrap();
        let books_v2 = state.table_mapping.get_table_id("v2", "books").unwrap().to_string();
        assert!(state.catalog.table(&books_v2).unwrap().foreign_keys().is_empty());
        assert_eq!(state.catalog.table(&books).unwrap().foreign_keys().len(), 1);
    }

    #[test]
    fn test_drop_unknown_key_fails() {
        let mut state = state_with(vec![(
            "v1",
            SchemaOperation::drop_foreign_key("books", "missing").unwrap(),
        )]);
        assert!(SchemaOperationsMigrator::migrate(&mut state, "v1").is_err());
    }
}
