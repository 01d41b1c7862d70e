//! The persisted model of a database under migration.

use super::{Changelog, RefLog, TableMapping};
use crate::catalog::Catalog;
use crate::error::Result;
use crate::migration::DataMappings;
use serde::{Deserialize, Serialize};

/// Catalog, history and provenance, loaded and persisted as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub catalog: Catalog,
    pub changelog: Changelog,
    pub ref_log: RefLog,
    pub table_mapping: TableMapping,
    #[serde(default)]
    pub data_mappings: DataMappings,
}

impl State {
    /// Start tracking an existing database at the changelog's root.
    pub fn bootstrap(catalog: Catalog, changelog: Changelog) -> Result<Self> {
        let root = changelog.root();
        let ref_log = RefLog::init(&catalog, root)?;
        let table_mapping = TableMapping::bootstrap(root.id(), &catalog);
        Ok(Self {
            catalog,
            changelog,
            ref_log,
            table_mapping,
            data_mappings: DataMappings::new(),
        })
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, ColumnType, Hint, Table};

    #[test]
    fn test_bootstrap_and_json() {
        let mut catalog = Catalog::new("shop");
        catalog
            .add_table(
                Table::new("orders")
                    .with_column(Column::new("id", ColumnType::Int8).with_hint(Hint::Identity)),
            )
            .unwrap();
        let state = State::bootstrap(catalog, Changelog::with_root("root").unwrap()).unwrap();

        assert_eq!(state.table_mapping.get_table_id("root", "orders").unwrap(), "orders");
        assert!(state.ref_log.versions().contains("root"));

        let decoded = State::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = State::from_json(b"{not json").unwrap_err();
        assert!(matches!(err, crate::error::Error::Deserialization(_)));
    }
}
