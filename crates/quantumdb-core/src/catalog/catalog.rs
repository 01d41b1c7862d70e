//! The catalog of physical tables.

use super::column::Column;
use super::foreign_key::ForeignKey;
use super::table::Table;
use crate::error::{check_state, require_non_empty, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory snapshot of a database schema, keyed by physical table id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Catalog (database) name.
    pub name: String,
    tables: BTreeMap<String, Table>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Add a table.
    ///
    /// The table must have at least one column, at least one identity
    /// column, unique column names, and its keys must point at tables that
    /// are already present (or at itself).
    pub fn add_table(&mut self, table: Table) -> Result<()> {
        require_non_empty(&table.name, "tableName")?;
        if self.tables.contains_key(&table.name) {
            return Err(Error::invalid_argument(format!(
                "Catalog: '{}' already contains table: '{}'.",
                self.name, table.name
            )));
        }
        if table.columns().is_empty() {
            return Err(Error::invalid_argument(format!(
                "Table: '{}' doesn't contain any columns.",
                table.name
            )));
        }
        if table.identity_columns().is_empty() {
            return Err(Error::invalid_argument(format!(
                "Table: '{}' has no identity columns.",
                table.name
            )));
        }

        let mut seen = BTreeSet::new();
        for column in table.columns() {
            require_non_empty(&column.name, "columnName")?;
            check_state(seen.insert(column.name.as_str()), || {
                format!(
                    "Table: {} already contains a column with name: {}",
                    table.name, column.name
                )
            })?;
        }

        for fk in table.foreign_keys() {
            let referred = if fk.referred_table == table.name {
                &table
            } else {
                self.table(&fk.referred_table)?
            };
            validate_columns(&table, &fk.referencing_columns)?;
            validate_columns(referred, &fk.referred_columns)?;
        }

        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Look up a table, failing with `InvalidArgument` when it is absent.
    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "Catalog: {} does not contain a table: {}",
                self.name, name
            ))
        })
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        let catalog = self.name.clone();
        self.tables.get_mut(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "Catalog: {} does not contain a table: {}",
                catalog, name
            ))
        })
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn table_names(&self) -> BTreeSet<String> {
        self.tables.keys().cloned().collect()
    }

    /// Remove a table that no other table refers to. Its outgoing keys go with it.
    pub fn remove_table(&mut self, name: &str) -> Result<Table> {
        self.table(name)?;

        let referencing: Vec<String> = self
            .tables_referencing(name)
            .into_iter()
            .filter(|other| other != name)
            .collect();
        check_state(referencing.is_empty(), || {
            format!(
                "The table: {} is still being referenced by: {:?}",
                name, referencing
            )
        })?;

        self.tables
            .remove(name)
            .ok_or_else(|| Error::illegal_state(format!("Table: {} vanished", name)))
    }

    /// Add a foreign key after validating both sides.
    pub fn add_foreign_key(&mut self, fk: ForeignKey) -> Result<()> {
        require_non_empty(&fk.name, "foreignKeyName")?;
        if fk.referencing_columns.is_empty()
            || fk.referencing_columns.len() != fk.referred_columns.len()
        {
            return Err(Error::invalid_argument(
                "You must refer to as many columns as you are referring from.",
            ));
        }

        let referencing = self.table(&fk.referencing_table)?;
        validate_columns(referencing, &fk.referencing_columns)?;
        validate_columns(self.table(&fk.referred_table)?, &fk.referred_columns)?;
        check_state(
            !referencing.foreign_keys().iter().any(|other| other.name == fk.name),
            || {
                format!(
                    "Table: {} already has a foreign key named: {}",
                    fk.referencing_table, fk.name
                )
            },
        )?;

        self.table_mut(&fk.referencing_table)?.push_foreign_key(fk);
        Ok(())
    }

    pub fn drop_foreign_key(&mut self, table: &str, name: &str) -> Result<ForeignKey> {
        self.table_mut(table)?.remove_foreign_key(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "Table: {} has no foreign key named: {}",
                table, name
            ))
        })
    }

    /// Names of tables with at least one key referring to `table`.
    pub fn tables_referencing(&self, table: &str) -> BTreeSet<String> {
        self.tables
            .values()
            .filter(|t| t.references_table(table))
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.tables.values().flat_map(|t| t.foreign_keys().iter())
    }

    pub fn incoming_foreign_keys<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ForeignKey> {
        self.foreign_keys().filter(move |fk| fk.referred_table == table)
    }

    /// Whether `fk` is a NOT NULL key, judged by its referencing table.
    pub fn is_not_nullable(&self, fk: &ForeignKey) -> bool {
        self.tables
            .get(&fk.referencing_table)
            .is_some_and(|t| t.is_not_nullable(fk))
    }

    /// Remove a column that no other key refers to.
    pub fn remove_column(&mut self, table: &str, column: &str) -> Result<Column> {
        let referenced_by: Vec<String> = self
            .incoming_foreign_keys(table)
            .filter(|fk| fk.referred_columns.iter().any(|c| c == column))
            .filter(|fk| {
                !(fk.referencing_table == table
                    && fk.referencing_columns.iter().any(|c| c == column))
            })
            .map(|fk| fk.name.clone())
            .collect();
        check_state(referenced_by.is_empty(), || {
            format!(
                "You cannot remove column: {}.{} that is still referenced by foreign keys: {:?}",
                table, column, referenced_by
            )
        })?;

        self.table_mut(table)?.remove_column(column)
    }

    /// Rename a column and every key, in any table, that refers to it.
    pub fn rename_column(&mut self, table: &str, old_name: &str, new_name: &str) -> Result<()> {
        self.table_mut(table)?.rename_column(old_name, new_name)?;
        for other in self.tables.values_mut() {
            if other.name == table {
                continue;
            }
            for fk in other.foreign_keys_mut() {
                if fk.referred_table == table {
                    for column in fk.referred_columns.iter_mut() {
                        if column == old_name {
                            *column = new_name.to_string();
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn validate_columns(table: &Table, columns: &[String]) -> Result<()> {
    for column in columns {
        if !table.contains_column(column) {
            return Err(Error::invalid_argument(format!(
                "The column: {} is not present in table: {}",
                column, table.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnType, Hint};

    fn identity(name: &str) -> Column {
        Column::new(name, ColumnType::Int8).with_hints([Hint::Identity, Hint::NotNull])
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new("shop");
        catalog
            .add_table(
                Table::new("stores")
                    .with_column(identity("id"))
                    .with_column(Column::new("name", ColumnType::Varchar(255))),
            )
            .unwrap();
        catalog
            .add_table(
                Table::new("staff")
                    .with_column(identity("id"))
                    .with_column(Column::new("store_id", ColumnType::Int8).with_hint(Hint::NotNull)),
            )
            .unwrap();
        catalog
            .add_foreign_key(ForeignKey::new("staff", ["store_id"], "stores", ["id"]))
            .unwrap();
        catalog
    }

    #[test]
    fn test_add_table_requires_identity() {
        let mut catalog = Catalog::new("shop");
        let err = catalog
            .add_table(Table::new("films").with_column(Column::new("name", ColumnType::Text)))
            .unwrap_err();
        assert!(err.is_argument_error());
    }

    #[test]
    fn test_add_table_rejects_duplicate() {
        let mut catalog = catalog();
        let err = catalog
            .add_table(Table::new("stores").with_column(identity("id")))
            .unwrap_err();
        assert!(err.is_argument_error());
    }

    #[test]
    fn test_add_foreign_key_validates_columns() {
        let mut catalog = catalog();
        let err = catalog
            .add_foreign_key(ForeignKey::new("staff", ["missing"], "stores", ["id"]))
            .unwrap_err();
        assert!(err.is_argument_error());

        let err = catalog
            .add_foreign_key(ForeignKey::new("staff", ["store_id"], "stores", ["id", "name"]))
            .unwrap_err();
        assert!(err.is_argument_error());
    }

    #[test]
    fn test_tables_referencing() {
        let catalog = catalog();
        let referencing = catalog.tables_referencing("stores");
        assert_eq!(referencing.into_iter().collect::<Vec<_>>(), vec!["staff"]);
        assert!(catalog.tables_referencing("staff").is_empty());
    }

    #[test]
    fn test_remove_referenced_table_fails() {
        let mut catalog = catalog();
        assert!(matches!(
            catalog.remove_table("stores"),
            Err(Error::IllegalState { .. })
        ));

        catalog.remove_table("staff").unwrap();
        catalog.remove_table("stores").unwrap();
        assert_eq!(catalog.tables().count(), 0);
    }

    #[test]
    fn test_remove_referenced_column_fails() {
        let mut catalog = catalog();
        catalog
            .table_mut("stores")
            .unwrap()
            .add_column(identity("code"))
            .unwrap();

        assert!(catalog.remove_column("stores", "id").is_err());
        assert!(catalog.remove_column("stores", "code").is_ok());
    }

    #[test]
    fn test_rename_column_updates_incoming_keys() {
        let mut catalog = catalog();
        catalog.rename_column("stores", "id", "store_id").unwrap();

        let fk = &catalog.table("staff").unwrap().foreign_keys()[0];
        assert_eq!(fk.referred_columns, vec!["store_id"]);
    }

    #[test]
    fn test_not_nullable_key() {
        let catalog = catalog();
        let fk = catalog.foreign_keys().next().unwrap();
        assert!(catalog.is_not_nullable(fk));
    }
}
