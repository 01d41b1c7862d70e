//! Table definitions.

use super::column::Column;
use super::foreign_key::ForeignKey;
use crate::error::{check_state, require_non_empty, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A physical table: ordered columns plus its outgoing foreign keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Physical table identifier.
    pub name: String,
    columns: Vec<Column>,
    foreign_keys: Vec<ForeignKey>,
}

impl Table {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Append a column. Duplicates are rejected when the table enters a catalog.
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Look up a column, failing with `InvalidArgument` when it is absent.
    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "Table: {} does not contain column: {}",
                self.name, name
            ))
        })
    }

    pub fn require_column_mut(&mut self, name: &str) -> Result<&mut Column> {
        let table = self.name.clone();
        self.column_mut(name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "Table: {} does not contain column: {}",
                table, name
            ))
        })
    }

    pub fn identity_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.is_identity()).collect()
    }

    pub fn identity_column_names(&self) -> BTreeSet<String> {
        self.identity_columns()
            .into_iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Add a column, rejecting duplicates.
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        require_non_empty(&column.name, "columnName")?;
        check_state(!self.contains_column(&column.name), || {
            format!(
                "Table: {} already contains a column with name: {}",
                self.name, column.name
            )
        })?;
        self.columns.push(column);
        Ok(())
    }

    /// Remove a column together with any outgoing key it takes part in.
    ///
    /// Incoming references are checked by [`Catalog::remove_column`](super::Catalog::remove_column).
    pub fn remove_column(&mut self, name: &str) -> Result<Column> {
        let position = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                Error::illegal_state(format!(
                    "You cannot remove a column which does not exist: {}",
                    name
                ))
            })?;

        let remaining_identities = self
            .columns
            .iter()
            .filter(|c| c.is_identity() && c.name != name)
            .count();
        check_state(remaining_identities > 0, || {
            format!(
                "You cannot drop the last remaining identity column of table: {}",
                self.name
            )
        })?;

        self.foreign_keys
            .retain(|fk| !fk.referencing_columns.iter().any(|c| c == name));
        Ok(self.columns.remove(position))
    }

    /// Rename a column and the references to it held by this table's own keys.
    pub fn rename_column(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        require_non_empty(new_name, "newColumnName")?;
        check_state(!self.contains_column(new_name), || {
            format!(
                "Table: {} already contains column with name: {}",
                self.name, new_name
            )
        })?;

        let table_name = self.name.clone();
        self.require_column_mut(old_name)?.name = new_name.to_string();
        for fk in &mut self.foreign_keys {
            rename_in(&mut fk.referencing_columns, old_name, new_name);
            if fk.referred_table == table_name {
                rename_in(&mut fk.referred_columns, old_name, new_name);
            }
        }
        Ok(())
    }

    /// The outgoing key a column takes part in, if any.
    pub fn outgoing_foreign_key(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys
            .iter()
            .find(|fk| fk.referencing_columns.iter().any(|c| c == column))
    }

    pub fn references_table(&self, table: &str) -> bool {
        self.foreign_keys.iter().any(|fk| fk.referred_table == table)
    }

    /// Whether every referencing column of `fk` is NOT NULL.
    pub fn is_not_nullable(&self, fk: &ForeignKey) -> bool {
        fk.referencing_columns
            .iter()
            .all(|name| self.column(name).is_some_and(Column::is_not_null))
    }

    /// Whether `fk` is made up of exactly this table's identity columns.
    pub fn is_inheritance_relation(&self, fk: &ForeignKey) -> bool {
        let referencing: BTreeSet<String> = fk.referencing_columns.iter().cloned().collect();
        !referencing.is_empty() && referencing == self.identity_column_names()
    }

    pub fn not_nullable_foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.foreign_keys.iter().filter(|fk| self.is_not_nullable(fk))
    }

    /// Copy the columns into a new table under another name. Keys are not copied.
    pub fn copy_as(&self, name: impl Into<String>) -> Table {
        Table {
            name: name.into(),
            columns: self.columns.clone(),
            foreign_keys: Vec::new(),
        }
    }

    pub(crate) fn push_foreign_key(&mut self, fk: ForeignKey) {
        self.foreign_keys.push(fk);
    }

    pub(crate) fn remove_foreign_key(&mut self, name: &str) -> Option<ForeignKey> {
        let position = self.foreign_keys.iter().position(|fk| fk.name == name)?;
        Some(self.foreign_keys.remove(position))
    }

    pub(crate) fn foreign_keys_mut(&mut self) -> &mut Vec<ForeignKey> {
        &mut self.foreign_keys
    }
}

fn rename_in(columns: &mut [String], old_name: &str, new_name: &str) {
    for column in columns.iter_mut() {
        if column == old_name {
            *column = new_name.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnType, Hint};

    fn users() -> Table {
        Table::new("users")
            .with_column(
                Column::new("id", ColumnType::Int8).with_hints([Hint::Identity, Hint::NotNull]),
            )
            .with_column(Column::new("name", ColumnType::Varchar(255)).with_hint(Hint::NotNull))
            .with_column(Column::new("referred_by", ColumnType::Int8))
    }

    #[test]
    fn test_add_duplicate_column() {
        let mut table = users();
        let err = table
            .add_column(Column::new("name", ColumnType::Text))
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState { .. }));
    }

    #[test]
    fn test_remove_last_identity_column() {
        let mut table = users();
        assert!(table.remove_column("id").is_err());
        assert!(table.remove_column("name").is_ok());
        assert_eq!(table.column_names(), vec!["id", "referred_by"]);
    }

    #[test]
    fn test_remove_column_drops_outgoing_key() {
        let mut table = users();
        table.push_foreign_key(ForeignKey::new("users", ["referred_by"], "users", ["id"]));

        table.remove_column("referred_by").unwrap();
        assert!(table.foreign_keys().is_empty());
    }

    #[test]
    fn test_rename_column_updates_keys() {
        let mut table = users();
        table.push_foreign_key(ForeignKey::new("users", ["referred_by"], "users", ["id"]));

        table.rename_column("referred_by", "referrer_id").unwrap();
        table.rename_column("id", "user_id").unwrap();

        let fk = &table.foreign_keys()[0];
        assert_eq!(fk.referencing_columns, vec!["referrer_id"]);
        assert_eq!(fk.referred_columns, vec!["user_id"]);
    }

    #[test]
    fn test_nullability_of_keys() {
        let mut table = users()
            .with_column(Column::new("store_id", ColumnType::Int8).with_hint(Hint::NotNull));
        table.push_foreign_key(ForeignKey::new("users", ["store_id"], "stores", ["id"]));
        table.push_foreign_key(ForeignKey::new("users", ["referred_by"], "users", ["id"]));

        let keys: Vec<_> = table.not_nullable_foreign_keys().collect();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].referred_table, "stores");
        assert!(!table.is_inheritance_relation(keys[0]));
    }

    #[test]
    fn test_copy_as_drops_keys() {
        let mut table = users();
        table.push_foreign_key(ForeignKey::new("users", ["referred_by"], "users", ["id"]));

        let copy = table.copy_as("table_1");
        assert_eq!(copy.name, "table_1");
        assert_eq!(copy.columns(), table.columns());
        assert!(copy.foreign_keys().is_empty());
    }
}
