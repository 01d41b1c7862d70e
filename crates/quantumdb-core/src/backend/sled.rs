//! Backend persisted in an embedded sled database.
//!
//! Four trees are used:
//! - `quantumdb:state`: the [`State`] as JSON under a single key
//! - `quantumdb:tables`: physical table definitions, keyed by table id
//! - `quantumdb:syncs`: installed data mappings, keyed by `source\0target`
//! - `quantumdb:migrations`: rkyv-encoded [`MigrationRecord`]s
//!
//! Row data lives with the application; this backend tracks the schema side
//! of a migration and the progress of its steps.

use super::{Backend, BackendKind};
use crate::catalog::Table;
use crate::error::{Error, Result};
use crate::migration::{DataMapping, MigrationRecord};
use crate::planner::Operation;
use crate::versioning::State;
use std::path::Path;
use tracing::{debug, info};

/// Backend storing everything in sled trees.
pub struct SledBackend {
    db: ::sled::Db,
    state: ::sled::Tree,
    tables: ::sled::Tree,
    syncs: ::sled::Tree,
    migrations: ::sled::Tree,
}

impl SledBackend {
    pub const STATE_TREE: &'static str = "quantumdb:state";
    pub const TABLES_TREE: &'static str = "quantumdb:tables";
    pub const SYNCS_TREE: &'static str = "quantumdb:syncs";
    pub const MIGRATIONS_TREE: &'static str = "quantumdb:migrations";

    const STATE_KEY: &'static [u8] = b"state";

    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = ::sled::Config::new()
            .path(path.as_ref())
            .use_compression(true)
            .open()?;
        info!(path = %path.as_ref().display(), "Opened sled backend");
        Self::from_db(db)
    }

    /// A database deleted when dropped.
    pub fn temporary() -> Result<Self> {
        let db = ::sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: ::sled::Db) -> Result<Self> {
        Ok(Self {
            state: db.open_tree(Self::STATE_TREE)?,
            tables: db.open_tree(Self::TABLES_TREE)?,
            syncs: db.open_tree(Self::SYNCS_TREE)?,
            migrations: db.open_tree(Self::MIGRATIONS_TREE)?,
            db,
        })
    }

    /// A stored table definition.
    pub fn table(&self, id: &str) -> Result<Option<Table>> {
        match self.tables.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Ids of every stored table.
    pub fn table_ids(&self) -> Result<Vec<String>> {
        self.tables
            .iter()
            .keys()
            .map(|key| Ok(String::from_utf8_lossy(&key?).into_owned()))
            .collect()
    }

    /// Every installed data mapping.
    pub fn syncs(&self) -> Result<Vec<DataMapping>> {
        self.syncs
            .iter()
            .values()
            .map(|value| Ok(serde_json::from_slice(&value?)?))
            .collect()
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn sync_key(source: &str, target: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(source.len() + target.len() + 1);
        key.extend_from_slice(source.as_bytes());
        key.push(0);
        key.extend_from_slice(target.as_bytes());
        key
    }

    fn migration_key(migration_id: &[u8; 16]) -> Vec<u8> {
        let mut key = Vec::with_capacity(10 + 16);
        key.extend_from_slice(b"migration:");
        key.extend_from_slice(migration_id);
        key
    }

    fn require_table(&self, id: &str) -> Result<()> {
        if self.tables.contains_key(id.as_bytes())? {
            Ok(())
        } else {
            Err(Error::backend("migrate_data", format!("Table: {} does not exist", id)))
        }
    }
}

impl Backend for SledBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sled
    }

    fn load_state(&self) -> Result<Option<State>> {
        match self.state.get(Self::STATE_KEY)? {
            Some(bytes) => Ok(Some(State::from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    fn persist_state(&mut self, state: &State) -> Result<()> {
        self.state.insert(Self::STATE_KEY, state.to_json()?)?;
        self.flush()?;
        debug!(versions = ?state.ref_log.versions(), "Persisted state");
        Ok(())
    }

    fn create_tables(&mut self, tables: &[Table]) -> Result<()> {
        for table in tables {
            if self.tables.contains_key(table.name.as_bytes())? {
                return Err(Error::backend(
                    "create_tables",
                    format!("Table: {} already exists", table.name),
                ));
            }
        }
        let mut batch = ::sled::Batch::default();
        for table in tables {
            debug!(table = %table.name, "Creating table");
            batch.insert(table.name.as_bytes(), serde_json::to_vec(table)?);
        }
        self.tables.apply_batch(batch)?;
        Ok(())
    }

    fn drop_tables(&mut self, tables: &[String]) -> Result<()> {
        for table in tables {
            debug!(%table, "Dropping table");
            self.tables.remove(table.as_bytes())?;
        }
        let stale: Vec<::sled::IVec> = self
            .syncs
            .iter()
            .keys()
            .filter_map(|key| key.ok())
            .filter(|key| {
                key.split(|byte| *byte == 0)
                    .any(|part| tables.iter().any(|table| table.as_bytes() == part))
            })
            .collect();
        for key in stale {
            self.syncs.remove(key)?;
        }
        Ok(())
    }

    fn install_data_mapping(&mut self, mapping: &DataMapping) -> Result<()> {
        let key = Self::sync_key(mapping.source_table(), mapping.target_table());
        self.syncs.insert(key, serde_json::to_vec(mapping)?)?;
        debug!(
            source = mapping.source_table(),
            target = mapping.target_table(),
            "Installed data mapping"
        );
        Ok(())
    }

    /// Checks that every table of the step is defined. Rows are copied by
    /// the application's own database, so no data moves here.
    fn migrate_data(&mut self, operation: &Operation, mappings: &[DataMapping]) -> Result<()> {
        for table in operation.tables() {
            self.require_table(table)?;
        }
        debug!(%operation, mappings = mappings.len(), "Migrated data");
        Ok(())
    }

    /// Always fails: there are no rows here for a statement to run against.
    fn execute(&mut self, statement: &str) -> Result<()> {
        Err(Error::backend(
            "execute",
            format!("The sled backend holds no row data and cannot run: {}", statement),
        ))
    }

    fn records(&self) -> Result<Vec<MigrationRecord>> {
        let mut records = self
            .migrations
            .iter()
            .values()
            .map(|value| MigrationRecord::from_bytes(&value?))
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|record| record.started_at);
        Ok(records)
    }

    fn save_record(&mut self, record: &MigrationRecord) -> Result<()> {
        let key = Self::migration_key(&record.migration_id);
        self.migrations.insert(key, record.to_bytes()?)?;
        Ok(())
    }
}
