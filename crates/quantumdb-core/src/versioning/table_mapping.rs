//! Per-version bijection between logical table names and physical tables.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Physical table backing a logical name, and the physical tables it was
/// derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMappingNode {
    pub table_id: String,
    pub based_on: BTreeSet<String>,
}

impl TableMappingNode {
    fn new(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            based_on: BTreeSet::new(),
        }
    }
}

/// Logical name to physical table id, per version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    versions: BTreeMap<String, BTreeMap<String, TableMappingNode>>,
}

impl TableMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every catalog table to itself at the root version.
    pub fn bootstrap(version: &str, catalog: &Catalog) -> Self {
        let mut mapping = Self::new();
        for table in catalog.tables() {
            mapping.add(version, &table.name, &table.name);
        }
        mapping.versions.entry(version.to_string()).or_default();
        mapping
    }

    /// Copy the parent's mapping verbatim into `version`.
    pub fn copy_mapping_from_parent(&mut self, version: &str, parent: &str) {
        let inherited = self.versions.get(parent).cloned().unwrap_or_default();
        let entries = self.versions.entry(version.to_string()).or_default();
        for (name, node) in inherited {
            entries.insert(name, node);
        }
    }

    pub fn add(&mut self, version: &str, table_name: &str, table_id: &str) {
        self.put(version, table_name, TableMappingNode::new(table_id));
    }

    pub fn rename(&mut self, version: &str, old_name: &str, new_name: &str) -> Result<()> {
        let node = self.take(version, old_name)?;
        self.put(version, new_name, node);
        Ok(())
    }

    /// Map `new_name` to `new_table_id`, derived from `source_name`'s table.
    pub fn copy(
        &mut self,
        version: &str,
        source_name: &str,
        new_name: &str,
        new_table_id: &str,
    ) -> Result<()> {
        let source = self.node(version, source_name)?.table_id.clone();
        let mut node = TableMappingNode::new(new_table_id);
        node.based_on.insert(source);
        self.put(version, new_name, node);
        Ok(())
    }

    /// Map `new_name` to a new physical table derived from several others.
    pub fn derive(
        &mut self,
        version: &str,
        new_name: &str,
        new_table_id: &str,
        based_on: impl IntoIterator<Item = String>,
    ) {
        let mut node = TableMappingNode::new(new_table_id);
        node.based_on.extend(based_on);
        self.put(version, new_name, node);
    }

    /// Point `table_name` at a ghost table.
    ///
    /// The ghost inherits the original's ancestry, or the original itself
    /// when it had none.
    pub fn ghost(&mut self, version: &str, table_name: &str, new_table_id: &str) -> Result<()> {
        let node = self.take(version, table_name)?;
        let mut based_on = node.based_on;
        if based_on.is_empty() {
            based_on.insert(node.table_id);
        }
        self.put(
            version,
            table_name,
            TableMappingNode {
                table_id: new_table_id.to_string(),
                based_on,
            },
        );
        Ok(())
    }

    /// Remove a logical table from a version, returning its physical id.
    pub fn remove(&mut self, version: &str, table_name: &str) -> Result<String> {
        Ok(self.take(version, table_name)?.table_id)
    }

    pub fn get_table_id(&self, version: &str, table_name: &str) -> Result<&str> {
        self.node(version, table_name).map(|node| node.table_id.as_str())
    }

    pub fn get_table_name(&self, version: &str, table_id: &str) -> Result<&str> {
        self.versions
            .get(version)
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|(_, node)| node.table_id == table_id)
                    .map(|(name, _)| name.as_str())
            })
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "Cannot find a table name for tableId: {} at version: {}",
                    table_id, version
                ))
            })
    }

    /// Any logical name ever mapped to the physical table.
    pub fn find_table_name(&self, table_id: &str) -> Option<&str> {
        self.versions
            .values()
            .flat_map(|entries| entries.iter())
            .find(|(_, node)| node.table_id == table_id)
            .map(|(name, _)| name.as_str())
    }

    pub fn get_table_ids(&self, version: &str) -> BTreeSet<String> {
        self.versions
            .get(version)
            .map(|entries| entries.values().map(|node| node.table_id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn all_table_ids(&self) -> BTreeSet<String> {
        self.versions
            .values()
            .flat_map(|entries| entries.values().map(|node| node.table_id.clone()))
            .collect()
    }

    pub fn get_table_names(&self, version: &str) -> BTreeSet<String> {
        self.versions
            .get(version)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Physical id to logical name at a version.
    pub fn get_table_mapping(&self, version: &str) -> BTreeMap<String, String> {
        self.versions
            .get(version)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(name, node)| (node.table_id.clone(), name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Versions that map some logical name to the physical table.
    pub fn versions_of(&self, table_id: &str) -> BTreeSet<String> {
        self.versions
            .iter()
            .filter(|(_, entries)| entries.values().any(|node| node.table_id == table_id))
            .map(|(version, _)| version.clone())
            .collect()
    }

    pub fn get_versions(&self) -> BTreeSet<String> {
        self.versions.keys().cloned().collect()
    }

    pub fn contains_version(&self, version: &str) -> bool {
        self.versions.contains_key(version)
    }

    /// Physical tables at `source` and the ghosts at `target` derived from them.
    pub fn get_ghost_table_id_mapping(
        &self,
        source: &str,
        target: &str,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let source_ids = self.get_table_ids(source);
        let mut ghosts: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let Some(entries) = self.versions.get(target) else {
            return ghosts;
        };

        for node in entries.values() {
            if source_ids.contains(&node.table_id) || node.based_on.is_empty() {
                continue;
            }
            if node.based_on.is_subset(&source_ids) {
                for original in &node.based_on {
                    ghosts
                        .entry(original.clone())
                        .or_default()
                        .insert(node.table_id.clone());
                }
            }
        }
        ghosts
    }

    fn node(&self, version: &str, table_name: &str) -> Result<&TableMappingNode> {
        self.versions
            .get(version)
            .and_then(|entries| entries.get(table_name))
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "Cannot find a tableId for table: {} at version: {}",
                    table_name, version
                ))
            })
    }

    fn put(&mut self, version: &str, table_name: &str, node: TableMappingNode) {
        trace!(version, table = table_name, table_id = %node.table_id, "Mapped table");
        self.versions
            .entry(version.to_string())
            .or_default()
            .insert(table_name.to_string(), node);
    }

    fn take(&mut self, version: &str, table_name: &str) -> Result<TableMappingNode> {
        self.versions
            .get_mut(version)
            .and_then(|entries| entries.remove(table_name))
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "Cannot find a tableId for table: {} at version: {}",
                    table_name, version
                ))
            })
    }
}

impl std::fmt::Display for TableMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (version, entries) in &self.versions {
            writeln!(f, "{}", version)?;
            for (name, node) in entries {
                writeln!(f, "\t{} -> {}", node.table_id, name)?;
            }
        }
        Ok(())
    }
}
