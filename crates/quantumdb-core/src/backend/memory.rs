//! In-process backend.
//!
//! Holds tables as rows of JSON values and records every effect it is asked
//! to perform, so migrations can be inspected without a database.

use super::{Backend, BackendKind};
use crate::catalog::Table;
use crate::error::{Error, Result};
use crate::migration::{DataMapping, MigrationRecord};
use crate::planner::{Operation, OperationType};
use crate::versioning::State;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Column values of one row.
pub type Row = BTreeMap<String, Value>;

/// Something the backend was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CreateTable(String),
    DropTable(String),
    InstallDataMapping { source: String, target: String },
    MigrateData(String),
    Execute(String),
}

#[derive(Debug, Clone)]
struct StoredRow {
    values: Row,
    placeholder: bool,
}

/// Backend keeping all data in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Option<Vec<u8>>,
    tables: BTreeMap<String, Table>,
    rows: BTreeMap<String, Vec<StoredRow>>,
    syncs: BTreeMap<(String, String), DataMapping>,
    records: Vec<MigrationRecord>,
    effects: Vec<Effect>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rows to a table, creating it implicitly.
    pub fn insert_rows(&mut self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.rows
            .entry(table.to_string())
            .or_default()
            .extend(rows.into_iter().map(|values| StoredRow {
                values,
                placeholder: false,
            }));
    }

    /// Rows of a table, placeholders excluded.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| !row.placeholder)
                    .map(|row| row.values.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of placeholder rows in a table.
    pub fn placeholders(&self, table: &str) -> usize {
        self.rows
            .get(table)
            .map_or(0, |rows| rows.iter().filter(|row| row.placeholder).count())
    }

    /// Tables created through [`Backend::create_tables`] and not dropped since.
    pub fn table_names(&self) -> BTreeSet<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn sync(&self, source: &str, target: &str) -> Option<&DataMapping> {
        self.syncs.get(&(source.to_string(), target.to_string()))
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    fn definition(&self, table: &str) -> Result<&Table> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::backend("migrate_data", format!("Table: {} does not exist", table)))
    }

    fn copy(&mut self, table: &str, columns: &[String], mappings: &[DataMapping]) -> Result<()> {
        let definition = self.definition(table)?.clone();
        let identity = definition.identity_column_names();
        let wanted: BTreeSet<&str> = columns.iter().map(String::as_str).collect();

        for mapping in mappings.iter().filter(|m| m.target_table() == table) {
            let sources = self.rows(mapping.source_table());
            for source in sources {
                let translated: Row = mapping
                    .column_mappings()
                    .iter()
                    .map(|(from, to)| {
                        (to.column.clone(), source.get(from).cloned().unwrap_or(Value::Null))
                    })
                    .collect();
                let key = key_of(&translated, &identity);

                let mut values: Row = definition
                    .columns()
                    .iter()
                    .filter(|column| wanted.contains(column.name.as_str()))
                    .map(|column| {
                        let value = translated.get(&column.name).cloned().unwrap_or_else(|| {
                            column
                                .default_value
                                .as_ref()
                                .map_or(Value::Null, |expression| Value::String(expression.clone()))
                        });
                        (column.name.clone(), value)
                    })
                    .collect();
                for column in &identity {
                    if let Some(value) = translated.get(column) {
                        values.insert(column.clone(), value.clone());
                    }
                }

                let rows = self.rows.entry(table.to_string()).or_default();
                match rows
                    .iter_mut()
                    .find(|row| !row.placeholder && key_of(&row.values, &identity) == key)
                {
                    Some(existing) => existing.values.extend(values),
                    None => rows.push(StoredRow {
                        values,
                        placeholder: false,
                    }),
                }
            }
        }
        Ok(())
    }
}

fn key_of(row: &Row, identity: &BTreeSet<String>) -> Vec<Value> {
    identity
        .iter()
        .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
        .collect()
}

impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn load_state(&self) -> Result<Option<State>> {
        self.state.as_deref().map(State::from_json).transpose()
    }

    fn persist_state(&mut self, state: &State) -> Result<()> {
        self.state = Some(state.to_json()?);
        Ok(())
    }

    fn create_tables(&mut self, tables: &[Table]) -> Result<()> {
        for table in tables {
            if self.tables.contains_key(&table.name) {
                return Err(Error::backend(
                    "create_tables",
                    format!("Table: {} already exists", table.name),
                ));
            }
        }
        for table in tables {
            debug!(table = %table.name, "Creating table");
            self.tables.insert(table.name.clone(), table.clone());
            self.rows.entry(table.name.clone()).or_default();
            self.effects.push(Effect::CreateTable(table.name.clone()));
        }
        Ok(())
    }

    fn drop_tables(&mut self, tables: &[String]) -> Result<()> {
        for table in tables {
            debug!(%table, "Dropping table");
            self.tables.remove(table);
            self.rows.remove(table);
            self.syncs
                .retain(|(source, target), _| source != table && target != table);
            self.effects.push(Effect::DropTable(table.clone()));
        }
        Ok(())
    }

    fn install_data_mapping(&mut self, mapping: &DataMapping) -> Result<()> {
        let key = (
            mapping.source_table().to_string(),
            mapping.target_table().to_string(),
        );
        self.syncs.insert(key, mapping.clone());
        self.effects.push(Effect::InstallDataMapping {
            source: mapping.source_table().to_string(),
            target: mapping.target_table().to_string(),
        });
        Ok(())
    }

    fn migrate_data(&mut self, operation: &Operation, mappings: &[DataMapping]) -> Result<()> {
        for table in operation.tables() {
            self.definition(table)?;
        }
        match operation.op_type() {
            OperationType::AddNull => {
                for table in operation.tables() {
                    self.rows.entry(table.clone()).or_default().push(StoredRow {
                        values: Row::new(),
                        placeholder: true,
                    });
                }
            }
            OperationType::DropNull => {
                for table in operation.tables() {
                    if let Some(rows) = self.rows.get_mut(table) {
                        rows.retain(|row| !row.placeholder);
                    }
                }
            }
            OperationType::Copy => {
                for table in operation.tables() {
                    self.copy(table, operation.columns(), mappings)?;
                }
            }
        }
        self.effects.push(Effect::MigrateData(operation.to_string()));
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> Result<()> {
        self.effects.push(Effect::Execute(statement.to_string()));
        Ok(())
    }

    fn records(&self) -> Result<Vec<MigrationRecord>> {
        Ok(self.records.clone())
    }

    fn save_record(&mut self, record: &MigrationRecord) -> Result<()> {
        match self
            .records
            .iter_mut()
            .find(|existing| existing.migration_id == record.migration_id)
        {
            Some(existing) => *existing = record.clone(),
            None => self.records.push(record.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, ColumnType, Hint};
    use crate::migration::Transformation;
    use serde_json::json;

    fn row(values: &[(&str, Value)]) -> Row {
        values
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    fn ghost() -> Table {
        Table::new("users_v1")
            .with_column(Column::new("id", ColumnType::Int8).with_hint(Hint::Identity))
            .with_column(Column::new("name", ColumnType::Text))
            .with_column(Column::new("active", ColumnType::Bool).with_default("true"))
    }

    fn mapping() -> DataMapping {
        let mut mapping = DataMapping::new("users", "users_v1");
        for column in ["id", "name"] {
            mapping
                .set_column_mapping(column, column, Transformation::identity())
                .unwrap();
        }
        mapping
    }

    #[test]
    fn test_copy_in_two_steps() {
        let mut backend = MemoryBackend::new();
        backend.insert_rows(
            "users",
            [
                row(&[("id", json!(1)), ("name", json!("ada"))]),
                row(&[("id", json!(2)), ("name", json!("alan"))]),
            ],
        );
        backend.create_tables(&[ghost()]).unwrap();

        let first = Operation::copy("users_v1", vec!["id".into(), "active".into()]);
        backend.migrate_data(&first, &[mapping()]).unwrap();
        assert_eq!(
            backend.rows("users_v1")[0],
            row(&[("id", json!(1)), ("active", json!("true"))])
        );

        let second = Operation::copy("users_v1", vec!["name".into()]);
        backend.migrate_data(&second, &[mapping()]).unwrap();
        let rows = backend.rows("users_v1");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["name"], json!("alan"));
        assert_eq!(rows[1]["id"], json!(2));
    }

    #[test]
    fn test_placeholders() {
        let mut backend = MemoryBackend::new();
        backend.create_tables(&[ghost()]).unwrap();
        let tables = BTreeSet::from(["users_v1".to_string()]);

        backend.migrate_data(&Operation::add_null(tables.clone()), &[]).unwrap();
        assert_eq!(backend.placeholders("users_v1"), 1);
        assert!(backend.rows("users_v1").is_empty());

        backend.migrate_data(&Operation::drop_null(tables), &[]).unwrap();
        assert_eq!(backend.placeholders("users_v1"), 0);
    }

    #[test]
    fn test_unknown_table_and_duplicates() {
        let mut backend = MemoryBackend::new();
        let copy = Operation::copy("users_v1", vec!["id".into()]);
        assert!(matches!(
            backend.migrate_data(&copy, &[]),
            Err(Error::Backend { .. })
        ));

        backend.create_tables(&[ghost()]).unwrap();
        assert!(backend.create_tables(&[ghost()]).is_err());

        backend.install_data_mapping(&mapping()).unwrap();
        backend.drop_tables(&["users_v1".to_string()]).unwrap();
        assert!(backend.table_names().is_empty());
        assert!(backend.sync("users", "users_v1").is_none());
        assert_eq!(
            backend.effects().last(),
            Some(&Effect::DropTable("users_v1".to_string()))
        );
    }

    #[test]
    fn test_state_and_records() {
        let mut backend = MemoryBackend::new();
        assert!(backend.load_state().unwrap().is_none());

        let mut record = MigrationRecord::new("root", "v1");
        backend.save_record(&record).unwrap();
        record.complete();
        backend.save_record(&record).unwrap();
        let records = backend.records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_terminal());
    }
}
