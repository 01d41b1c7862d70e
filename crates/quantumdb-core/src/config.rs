//! Migrator configuration.

use crate::backend::BackendKind;
use crate::error::{Error, Result};
use std::path::PathBuf;

/// Environment variable selecting the backend.
pub const BACKEND_VAR: &str = "QUANTUMDB_BACKEND";

/// Environment variable holding the sled data directory.
pub const DATA_PATH_VAR: &str = "QUANTUMDB_DATA_PATH";

/// Configuration for a [`Migrator`](crate::migration::Migrator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    /// Backend opened by [`backend::open`](crate::backend::open).
    pub backend: BackendKind,
    /// Directory of the sled database. Required by the sled backend.
    pub data_path: Option<PathBuf>,
    /// Run the plan validator on every plan before executing it.
    pub validate_plans: bool,
    /// Plan and report without calling any mutating backend method.
    pub dry_run: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            data_path: None,
            validate_plans: true,
            dry_run: false,
        }
    }
}

impl MigratorConfig {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Sled backend storing its data under `path`.
    pub fn sled(path: impl Into<PathBuf>) -> Self {
        Self::new(BackendKind::Sled).with_data_path(path)
    }

    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    pub fn with_validate_plans(mut self, validate: bool) -> Self {
        self.validate_plans = validate;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Read `QUANTUMDB_BACKEND` and `QUANTUMDB_DATA_PATH`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any variable source. Unset variables keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(backend) = lookup(BACKEND_VAR) {
            config.backend = backend.parse()?;
        }
        if let Some(path) = lookup(DATA_PATH_VAR).filter(|path| !path.is_empty()) {
            config.data_path = Some(PathBuf::from(path));
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the settings required by the selected backend are present.
    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Sled && self.data_path.is_none() {
            return Err(Error::invalid_argument(format!(
                "The sled backend requires a data path; set {}",
                DATA_PATH_VAR
            )));
        }
        Ok(())
    }
}
