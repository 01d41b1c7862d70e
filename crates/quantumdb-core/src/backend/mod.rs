//! Storage backends driven by the migrator.
//!
//! A backend persists the [`State`] between runs, owns the physical tables
//! and moves data between them as plan steps are executed. Backends are
//! chosen by [`BackendKind`] and opened through [`open`].

pub mod memory;
pub mod sled;

pub use self::memory::{Effect, MemoryBackend, Row};
pub use self::sled::SledBackend;

use crate::catalog::Table;
use crate::config::MigratorConfig;
use crate::error::{Error, Result};
use crate::migration::{DataMapping, MigrationRecord};
use crate::planner::Operation;
use crate::versioning::State;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// The available backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Everything kept in process.
    Memory,
    /// Embedded sled database.
    Sled,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Sled => write!(f, "sled"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "sled" => Ok(BackendKind::Sled),
            other => Err(Error::invalid_argument(format!(
                "Unknown backend: '{}', expected one of: memory, sled",
                other
            ))),
        }
    }
}

/// Operations the migrator needs from a database.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// The persisted state, or `None` for a database never migrated.
    fn load_state(&self) -> Result<Option<State>>;

    fn persist_state(&mut self, state: &State) -> Result<()>;

    /// Create empty physical tables.
    fn create_tables(&mut self, tables: &[Table]) -> Result<()>;

    fn drop_tables(&mut self, tables: &[String]) -> Result<()>;

    /// Keep the target of `mapping` in sync with writes to its source.
    fn install_data_mapping(&mut self, mapping: &DataMapping) -> Result<()>;

    /// Run one plan step. `mappings` are the mappings feeding the tables of
    /// the operation from the live tables.
    fn migrate_data(&mut self, operation: &Operation, mappings: &[DataMapping]) -> Result<()>;

    /// Run a raw data statement.
    fn execute(&mut self, statement: &str) -> Result<()>;

    /// Migration records, oldest first.
    fn records(&self) -> Result<Vec<MigrationRecord>>;

    /// Insert or replace a record by its migration id.
    fn save_record(&mut self, record: &MigrationRecord) -> Result<()>;
}

/// Open the backend selected by `config`.
pub fn open(config: &MigratorConfig) -> Result<Box<dyn Backend>> {
    config.validate()?;
    info!(backend = %config.backend, "Opening backend");
    match config.backend {
        BackendKind::Memory => Ok(Box::new(MemoryBackend::new())),
        BackendKind::Sled => {
            let path = config
                .data_path
                .as_ref()
                .ok_or_else(|| Error::invalid_argument("The sled backend requires a data path"))?;
            Ok(Box::new(SledBackend::open(path)?))
        }
    }
}
