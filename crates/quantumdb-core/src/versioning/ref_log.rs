//! Provenance of logical tables and columns across versions.
//!
//! The RefLog records, for every version, which physical table backs each
//! logical table name. Column ancestry ("based on" / "basis for") links the
//! columns of a ghost table to the columns it was derived from. All records
//! live in arenas and refer to each other by index, so ancestry cycles never
//! form ownership cycles.

use super::changelog::{Changelog, Version};
use crate::catalog::Catalog;
use crate::error::{check_state, require_non_empty, Error, Result};
use crate::migration::traverser::{Direction, VersionTraverser};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Index of a [`TableRef`] in the RefLog arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRefId(usize);

/// Index of a [`ColumnRef`] in the RefLog arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnRefId(usize);

/// Index of a [`SyncRef`] in the RefLog arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncRefId(usize);

/// A logical table backed by one physical table for a set of versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    id: TableRefId,
    name: String,
    table_id: String,
    versions: BTreeSet<String>,
    columns: Vec<ColumnRefId>,
    outbound_syncs: BTreeSet<SyncRefId>,
    inbound_syncs: BTreeSet<SyncRefId>,
    dropped: bool,
}

impl TableRef {
    pub fn id(&self) -> TableRefId {
        self.id
    }

    /// Logical table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Physical table identifier.
    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    /// Versions for which this is the active mapping.
    pub fn versions(&self) -> &BTreeSet<String> {
        &self.versions
    }

    pub fn columns(&self) -> &[ColumnRefId] {
        &self.columns
    }

    pub fn outbound_syncs(&self) -> &BTreeSet<SyncRefId> {
        &self.outbound_syncs
    }

    pub fn inbound_syncs(&self) -> &BTreeSet<SyncRefId> {
        &self.inbound_syncs
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }
}

/// A column of a [`TableRef`] with its ancestry edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    name: String,
    table: Option<TableRefId>,
    based_on: BTreeSet<ColumnRefId>,
    basis_for: BTreeSet<ColumnRefId>,
}

impl ColumnRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> Option<TableRefId> {
        self.table
    }

    /// Immediate ancestors.
    pub fn based_on(&self) -> &BTreeSet<ColumnRefId> {
        &self.based_on
    }

    /// Immediate descendants.
    pub fn basis_for(&self) -> &BTreeSet<ColumnRefId> {
        &self.basis_for
    }
}

/// Declaration of a one-directional synchronization between two tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRef {
    name: String,
    function_name: String,
    column_mapping: Vec<(ColumnRefId, ColumnRefId)>,
    source: TableRefId,
    target: TableRefId,
    dropped: bool,
}

impl SyncRef {
    /// Trigger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn column_mapping(&self) -> &[(ColumnRefId, ColumnRefId)] {
        &self.column_mapping
    }

    pub fn source(&self) -> TableRefId {
        self.source
    }

    pub fn target(&self) -> TableRefId {
        self.target
    }
}

/// A column to create as part of a new [`TableRef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewColumnRef {
    name: String,
    based_on: BTreeSet<ColumnRefId>,
}

impl NewColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            based_on: BTreeSet::new(),
        }
    }

    pub fn based_on(mut self, ancestors: impl IntoIterator<Item = ColumnRefId>) -> Self {
        self.based_on.extend(ancestors);
        self
    }
}

/// Arena-backed provenance log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefLog {
    tables: Vec<TableRef>,
    columns: Vec<ColumnRef>,
    syncs: Vec<SyncRef>,
    by_version: BTreeMap<String, Vec<TableRefId>>,
    active_versions: BTreeSet<String>,
}

impl RefLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RefLog seeded from the catalog at the root version.
    pub fn init(catalog: &Catalog, root: &Version) -> Result<Self> {
        let mut ref_log = Self::new();
        ref_log.bootstrap(catalog, root)?;
        Ok(ref_log)
    }

    /// Seed one TableRef per physical table, with no ancestry, and mark the
    /// version as active.
    pub fn bootstrap(&mut self, catalog: &Catalog, root: &Version) -> Result<()> {
        check_argument(root.is_root(), "You must specify a root version!")?;

        for table in catalog.tables() {
            let columns = table.column_names().into_iter().map(NewColumnRef::new).collect();
            self.add_table(root.id(), &table.name, &table.name, columns)?;
            debug!(
                table = %table.name,
                version = %root.id(),
                "Added TableRef for existing table"
            );
        }

        self.set_version_state(root.id(), true);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.by_version.is_empty()
    }

    /// Whether any TableRef is present at the version.
    pub fn contains_version(&self, version: &str) -> bool {
        self.by_version.contains_key(version)
    }

    /// Extend every TableRef active at the version's parent to the version.
    pub fn fork(&mut self, version: &Version) -> Result<()> {
        let parent = version
            .parent()
            .ok_or_else(|| Error::invalid_argument("You cannot fork to a root version!"))?;
        check_argument(
            self.by_version.is_empty() || self.by_version.contains_key(parent),
            "You cannot fork to a version whose parent is not in the RefLog!",
        )?;

        let inherited = self.by_version.get(parent).cloned().unwrap_or_default();
        for table in inherited {
            self.mark_present(table, version.id());
        }
        Ok(())
    }

    fn mark_present(&mut self, table: TableRefId, version: &str) {
        let table_ref = &mut self.tables[table.0];
        table_ref.versions.insert(version.to_string());
        let present = self.by_version.entry(version.to_string()).or_default();
        if !present.contains(&table) {
            present.push(table);
        }
        debug!(
            table = %table_ref.name,
            table_id = %table_ref.table_id,
            version,
            "Marked TableRef as present"
        );
    }

    fn mark_absent(&mut self, table: TableRefId, version: &str) {
        let table_ref = &mut self.tables[table.0];
        table_ref.versions.remove(version);
        if let Some(present) = self.by_version.get_mut(version) {
            present.retain(|candidate| *candidate != table);
        }
        debug!(
            table = %table_ref.name,
            table_id = %table_ref.table_id,
            version,
            "Marked TableRef as absent"
        );
    }

    pub fn table_ref(&self, id: TableRefId) -> Result<&TableRef> {
        self.tables
            .get(id.0)
            .ok_or_else(|| Error::invalid_argument(format!("Unknown TableRef: {}", id.0)))
    }

    pub fn column_ref(&self, id: ColumnRefId) -> Result<&ColumnRef> {
        self.columns
            .get(id.0)
            .ok_or_else(|| Error::invalid_argument(format!("Unknown ColumnRef: {}", id.0)))
    }

    pub fn sync_ref(&self, id: SyncRefId) -> Result<&SyncRef> {
        self.syncs
            .get(id.0)
            .ok_or_else(|| Error::invalid_argument(format!("Unknown SyncRef: {}", id.0)))
    }

    /// Every TableRef still present in at least one version.
    pub fn all_table_refs(&self) -> impl Iterator<Item = &TableRef> {
        self.tables.iter().filter(|table| !table.dropped)
    }

    /// TableRefs present at the version, in insertion order.
    pub fn get_table_refs(&self, version: &str) -> Vec<&TableRef> {
        self.by_version
            .get(version)
            .map(|ids| ids.iter().map(|id| &self.tables[id.0]).collect())
            .unwrap_or_default()
    }

    /// The TableRef for a logical name at a version.
    pub fn get_table_ref(&self, version: &str, name: &str) -> Result<&TableRef> {
        require_non_empty(version, "version")?;
        require_non_empty(name, "tableName")?;
        self.find_table_ref(version, name).ok_or_else(|| {
            Error::invalid_argument(format!(
                "Version: {} does not contain a TableRef with tableName: {}",
                version, name
            ))
        })
    }

    fn find_table_ref(&self, version: &str, name: &str) -> Option<&TableRef> {
        self.by_version
            .get(version)?
            .iter()
            .map(|id| &self.tables[id.0])
            .find(|table| table.name == name)
    }

    /// The most recently created live TableRef backed by a physical table.
    pub fn get_table_ref_by_id(&self, table_id: &str) -> Result<&TableRef> {
        require_non_empty(table_id, "tableId")?;
        self.tables
            .iter()
            .rev()
            .find(|table| !table.dropped && table.table_id == table_id)
            .ok_or_else(|| Error::invalid_argument(format!("No table with id: {}", table_id)))
    }

    /// Physical ids in use at a version.
    pub fn table_ids(&self, version: &str) -> BTreeSet<String> {
        self.get_table_refs(version)
            .into_iter()
            .map(|table| table.table_id.clone())
            .collect()
    }

    /// Physical ids in use by any live TableRef.
    pub fn all_table_ids(&self) -> BTreeSet<String> {
        self.all_table_refs()
            .map(|table| table.table_id.clone())
            .collect()
    }

    /// Create a new TableRef at `version`.
    ///
    /// The name and physical id must both be unused at that version.
    pub fn add_table(
        &mut self,
        version: &str,
        name: &str,
        table_id: &str,
        columns: Vec<NewColumnRef>,
    ) -> Result<TableRefId> {
        require_non_empty(name, "name")?;
        require_non_empty(table_id, "tableId")?;
        require_non_empty(version, "version")?;

        check_state(self.find_table_ref(version, name).is_none(), || {
            format!(
                "A TableRef for tableName: {} is already present for version: {}",
                name, version
            )
        })?;
        check_state(
            self.get_table_refs(version)
                .iter()
                .all(|table| table.table_id != table_id),
            || {
                format!(
                    "A TableRef with tableId: {} is already present for version: {}",
                    table_id, version
                )
            },
        )?;

        let id = TableRefId(self.tables.len());
        self.tables.push(TableRef {
            id,
            name: name.to_string(),
            table_id: table_id.to_string(),
            versions: BTreeSet::new(),
            columns: Vec::new(),
            outbound_syncs: BTreeSet::new(),
            inbound_syncs: BTreeSet::new(),
            dropped: false,
        });
        for column in columns {
            self.add_column(id, column)?;
        }
        self.mark_present(id, version);
        Ok(id)
    }

    /// Replace the TableRef for `source_name` at `version` with a new one
    /// whose columns are each based on the corresponding old column.
    pub fn replace_table(
        &mut self,
        version: &str,
        source_name: &str,
        target_name: &str,
        table_id: &str,
    ) -> Result<TableRefId> {
        require_non_empty(version, "version")?;
        require_non_empty(source_name, "sourceTableName")?;
        require_non_empty(target_name, "targetTableName")?;
        require_non_empty(table_id, "tableId")?;

        let old = self.drop_table(version, source_name)?;
        let columns = self.tables[old.0]
            .columns
            .iter()
            .map(|column| NewColumnRef::new(self.columns[column.0].name.clone()).based_on([*column]))
            .collect();
        self.add_table(version, target_name, table_id, columns)
    }

    /// Remove the TableRef for `name` from `version`.
    ///
    /// The TableRef is only disconnected entirely once no version uses it.
    pub fn drop_table(&mut self, version: &str, name: &str) -> Result<TableRefId> {
        let table = self.get_table_ref(version, name)?.id;
        self.mark_absent(table, version);
        if self.tables[table.0].versions.is_empty() {
            self.disconnect(table);
        }
        Ok(table)
    }

    fn disconnect(&mut self, table: TableRefId) {
        let columns = self.tables[table.0].columns.clone();
        for column in columns {
            self.splice_out(column);
        }
        let syncs: Vec<SyncRefId> = {
            let table_ref = &self.tables[table.0];
            table_ref
                .inbound_syncs
                .iter()
                .chain(table_ref.outbound_syncs.iter())
                .copied()
                .collect()
        };
        for sync in syncs {
            self.detach_sync(sync);
        }
        self.tables[table.0].dropped = true;
    }

    /// Rewire a column's ancestors directly to its descendants and detach it.
    fn splice_out(&mut self, column: ColumnRefId) {
        let based_on = std::mem::take(&mut self.columns[column.0].based_on);
        let basis_for = std::mem::take(&mut self.columns[column.0].basis_for);
        for from in &based_on {
            self.columns[from.0].basis_for.remove(&column);
        }
        for to in &basis_for {
            self.columns[to.0].based_on.remove(&column);
        }
        for from in &based_on {
            for to in &basis_for {
                self.link_columns(*from, *to);
            }
        }
    }

    fn link_columns(&mut self, from: ColumnRefId, to: ColumnRefId) {
        self.columns[from.0].basis_for.insert(to);
        self.columns[to.0].based_on.insert(from);
    }

    /// Rename the logical table at `version`.
    ///
    /// A TableRef shared with other versions is split so those versions keep
    /// the old name; both refs point at the same physical table.
    pub fn rename_table(&mut self, version: &str, old_name: &str, new_name: &str) -> Result<TableRefId> {
        require_non_empty(new_name, "newTableName")?;
        let table = self.get_table_ref(version, old_name)?;
        check_state(self.find_table_ref(version, new_name).is_none(), || {
            format!(
                "A TableRef for tableName: {} is already present for version: {}",
                new_name, version
            )
        })?;

        let id = table.id;
        if table.versions.len() == 1 {
            self.tables[id.0].name = new_name.to_string();
            return Ok(id);
        }

        let table_id = table.table_id.clone();
        self.mark_absent(id, version);
        let columns = self.tables[id.0]
            .columns
            .iter()
            .map(|column| NewColumnRef::new(self.columns[column.0].name.clone()).based_on([*column]))
            .collect();
        self.add_table(version, new_name, &table_id, columns)
    }

    /// Add a column to a TableRef, linking its ancestry.
    pub fn add_column(&mut self, table: TableRefId, column: NewColumnRef) -> Result<ColumnRefId> {
        require_non_empty(&column.name, "columnName")?;
        check_argument(table.0 < self.tables.len(), "Unknown TableRef")?;
        check_argument(
            column.based_on.iter().all(|ancestor| ancestor.0 < self.columns.len()),
            "Unknown ColumnRef in ancestry",
        )?;
        check_state(self.find_column(table, &column.name).is_none(), || {
            format!(
                "Table: {} already contains a column: {}",
                self.tables[table.0].table_id, column.name
            )
        })?;

        let id = ColumnRefId(self.columns.len());
        self.columns.push(ColumnRef {
            name: column.name,
            table: Some(table),
            based_on: BTreeSet::new(),
            basis_for: BTreeSet::new(),
        });
        for ancestor in column.based_on {
            self.link_columns(ancestor, id);
        }
        self.tables[table.0].columns.push(id);
        Ok(id)
    }

    /// Remove a column, rewiring its ancestors to its descendants.
    pub fn drop_column(&mut self, table: TableRefId, name: &str) -> Result<ColumnRefId> {
        let column = self.require_column(table, name)?;
        self.tables[table.0].columns.retain(|candidate| *candidate != column);
        self.splice_out(column);
        self.columns[column.0].table = None;
        Ok(column)
    }

    pub fn rename_column(&mut self, table: TableRefId, old_name: &str, new_name: &str) -> Result<()> {
        require_non_empty(new_name, "newColumnName")?;
        let column = self.require_column(table, old_name)?;
        check_state(self.find_column(table, new_name).is_none(), || {
            format!(
                "Table: {} already contains a column: {}",
                self.tables[table.0].table_id, new_name
            )
        })?;
        self.columns[column.0].name = new_name.to_string();
        Ok(())
    }

    /// Find a column of a TableRef by name.
    pub fn find_column(&self, table: TableRefId, name: &str) -> Option<ColumnRefId> {
        self.tables
            .get(table.0)?
            .columns
            .iter()
            .copied()
            .find(|column| self.columns[column.0].name == name)
    }

    fn require_column(&self, table: TableRefId, name: &str) -> Result<ColumnRefId> {
        check_argument(table.0 < self.tables.len(), "Unknown TableRef")?;
        self.find_column(table, name).ok_or_else(|| {
            Error::illegal_state(format!(
                "Table: {} does not contain a column: {}",
                self.tables[table.0].table_id, name
            ))
        })
    }

    /// TableRefs whose columns the given TableRef's columns are based on.
    pub fn based_on_tables(&self, table: TableRefId) -> Result<BTreeSet<TableRefId>> {
        self.neighbour_tables(table, |column| &column.based_on)
    }

    /// TableRefs whose columns are based on the given TableRef's columns.
    pub fn basis_for_tables(&self, table: TableRefId) -> Result<BTreeSet<TableRefId>> {
        self.neighbour_tables(table, |column| &column.basis_for)
    }

    fn neighbour_tables(
        &self,
        table: TableRefId,
        edges: impl Fn(&ColumnRef) -> &BTreeSet<ColumnRefId>,
    ) -> Result<BTreeSet<TableRefId>> {
        Ok(self
            .table_ref(table)?
            .columns
            .iter()
            .filter_map(|column| self.columns.get(column.0))
            .flat_map(|column| edges(column).iter())
            .filter_map(|neighbour| self.columns.get(neighbour.0)?.table)
            .collect())
    }

    /// Declare a sync from exactly one source table to one other target table.
    pub fn add_sync(
        &mut self,
        name: &str,
        function_name: &str,
        column_mapping: Vec<(ColumnRefId, ColumnRefId)>,
    ) -> Result<SyncRefId> {
        require_non_empty(name, "name")?;
        require_non_empty(function_name, "functionName")?;
        check_argument(!column_mapping.is_empty(), "You must specify a column mapping!")?;
        check_state(
            self.syncs.iter().all(|sync| sync.dropped || sync.name != name),
            || format!("A SyncRef with name: {} is already present!", name),
        )?;

        let owner = |column: ColumnRefId| -> Result<TableRefId> {
            self.columns
                .get(column.0)
                .and_then(|column| column.table)
                .ok_or_else(|| Error::invalid_argument("Sync columns must belong to a table"))
        };
        let mut sources = BTreeSet::new();
        let mut targets = BTreeSet::new();
        for (from, to) in &column_mapping {
            sources.insert(owner(*from)?);
            targets.insert(owner(*to)?);
        }
        check_argument(sources.len() == 1, "There can be only one source table!")?;
        check_argument(targets.len() == 1, "There can be only one target table!")?;

        let (source, target) = match (sources.first(), targets.first()) {
            (Some(source), Some(target)) => (*source, *target),
            _ => return Err(Error::invalid_argument("You must specify a column mapping!")),
        };
        check_state(source != target, || {
            "You cannot add a recursive sync function!".to_string()
        })?;

        let id = SyncRefId(self.syncs.len());
        for (from, to) in &column_mapping {
            self.link_columns(*from, *to);
        }
        self.syncs.push(SyncRef {
            name: name.to_string(),
            function_name: function_name.to_string(),
            column_mapping,
            source,
            target,
            dropped: false,
        });
        self.tables[source.0].outbound_syncs.insert(id);
        self.tables[target.0].inbound_syncs.insert(id);
        debug!(sync = name, function = function_name, "Added SyncRef");
        Ok(id)
    }

    pub fn drop_sync(&mut self, sync: SyncRefId) -> Result<()> {
        check_argument(
            self.syncs.get(sync.0).is_some_and(|sync| !sync.dropped),
            "Unknown SyncRef",
        )?;
        self.detach_sync(sync);
        Ok(())
    }

    fn detach_sync(&mut self, sync: SyncRefId) {
        let (source, target) = (self.syncs[sync.0].source, self.syncs[sync.0].target);
        self.tables[source.0].outbound_syncs.remove(&sync);
        self.tables[target.0].inbound_syncs.remove(&sync);
        self.syncs[sync.0].dropped = true;
    }

    /// Syncs that have not been dropped.
    pub fn syncs(&self) -> impl Iterator<Item = (SyncRefId, &SyncRef)> {
        self.syncs
            .iter()
            .enumerate()
            .filter(|(_, sync)| !sync.dropped)
            .map(|(index, sync)| (SyncRefId(index), sync))
    }

    /// Direction in which a sync moves data through the history.
    pub fn sync_direction(&self, changelog: &Changelog, sync: SyncRefId) -> Option<Direction> {
        let sync = self.syncs.get(sync.0)?;
        self.direction_between(changelog, sync.source, sync.target)
    }

    fn direction_between(
        &self,
        changelog: &Changelog,
        from: TableRefId,
        to: TableRefId,
    ) -> Option<Direction> {
        let origin = VersionTraverser::get_first(changelog, &self.tables.get(from.0)?.versions)?;
        let destination = VersionTraverser::get_first(changelog, &self.tables.get(to.0)?.versions)?;
        VersionTraverser::get_direction(changelog, origin.id(), destination.id())
    }

    /// For every TableRef at `from`, the TableRefs at `to` that evolved from it.
    ///
    /// With `filter_unchanged`, a TableRef present unchanged at both versions
    /// is not reported as its own successor.
    pub fn get_table_mapping(
        &self,
        from: &str,
        to: &str,
        filter_unchanged: bool,
    ) -> BTreeMap<TableRefId, BTreeSet<TableRefId>> {
        let mut mapping = BTreeMap::new();
        for table in self.get_table_refs(from) {
            let mut targets = BTreeSet::new();
            let mut visited = BTreeSet::new();
            let mut to_check = VecDeque::from([table.id]);

            while let Some(pointer) = to_check.pop_front() {
                if !visited.insert(pointer) {
                    continue;
                }
                let Some(candidate) = self.tables.get(pointer.0) else {
                    continue;
                };
                if candidate.versions.contains(to) {
                    if !filter_unchanged || candidate.table_id != table.table_id {
                        targets.insert(pointer);
                    }
                } else {
                    to_check.extend(self.basis_for_tables(pointer).unwrap_or_default());
                }
            }
            mapping.insert(table.id, targets);
        }
        mapping
    }

    /// Follow column ancestry from one TableRef to another.
    ///
    /// Columns with no counterpart in `to` are omitted.
    pub fn get_column_mapping(
        &self,
        changelog: &Changelog,
        from: TableRefId,
        to: TableRefId,
    ) -> Result<BTreeMap<ColumnRefId, ColumnRefId>> {
        let source_table = self.table_ref(from)?;
        self.table_ref(to)?;
        let forwards = from != to
            && self.direction_between(changelog, from, to) == Some(Direction::Forwards);

        let mut mapping = BTreeMap::new();
        for source in &source_table.columns {
            let mut visited = BTreeSet::new();
            let mut frontier = VecDeque::from([*source]);
            while let Some(column) = frontier.pop_front() {
                if !visited.insert(column) {
                    continue;
                }
                let Some(column_ref) = self.columns.get(column.0) else {
                    continue;
                };
                if column_ref.table == Some(to) {
                    mapping.entry(*source).or_insert(column);
                    break;
                }
                let next = if forwards {
                    &column_ref.basis_for
                } else {
                    &column_ref.based_on
                };
                frontier.extend(next.iter().copied());
            }
        }
        Ok(mapping)
    }

    pub fn set_version_state(&mut self, version: &str, active: bool) {
        if active {
            self.active_versions.insert(version.to_string());
        } else {
            self.active_versions.remove(version);
        }
    }

    /// Versions currently live in the database.
    pub fn versions(&self) -> &BTreeSet<String> {
        &self.active_versions
    }

}

fn check_argument(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::invalid_argument(message))
    }
}
