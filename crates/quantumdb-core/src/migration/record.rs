//! Persistent migration records.
//!
//! Every call to [`Migrator::migrate`](super::Migrator::migrate) leaves a
//! record behind so that status reporting and crash recovery can tell which
//! steps of which migration ran.

use crate::error::{Error, Result};
use chrono::Utc;
use rkyv::{Archive, Deserialize, Serialize};

/// State of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum MigrationStatus {
    /// Migration created but not started.
    Pending,
    /// Ghost tables are being created and populated.
    Running,
    /// The target version is live.
    Complete,
    /// Migration failed.
    Failed,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Pending => write!(f, "pending"),
            MigrationStatus::Running => write!(f, "running"),
            MigrationStatus::Complete => write!(f, "complete"),
            MigrationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a single step within a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum StepStatus {
    /// Step not yet started.
    Pending,
    /// Step completed successfully.
    Complete,
    /// Step failed.
    Failed,
    /// Step was planned but not executed (dry run).
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Complete => write!(f, "complete"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One executed (or planned) data operation.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct StepRecord {
    /// Rendered operation, e.g. `COPY [table_1a2b] [id, name]`.
    pub description: String,
    pub status: StepStatus,
}

/// A migration from one version to another.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Unique migration ID.
    pub migration_id: [u8; 16],
    /// Version the database was at.
    pub from_version: String,
    /// Version the database was taken to.
    pub to_version: String,
    pub status: MigrationStatus,
    /// When the migration started (microseconds since epoch).
    pub started_at: i64,
    /// When the migration finished (microseconds since epoch).
    pub completed_at: Option<i64>,
    /// Error message if the migration failed.
    pub error: Option<String>,
    /// Steps across every stage, in execution order.
    pub steps: Vec<StepRecord>,
}

impl MigrationRecord {
    pub fn new(from_version: impl Into<String>, to_version: impl Into<String>) -> Self {
        let from_version = from_version.into();
        let to_version = to_version.into();
        let started_at = now();
        Self {
            migration_id: generate_migration_id(&from_version, &to_version, started_at),
            from_version,
            to_version,
            status: MigrationStatus::Pending,
            started_at,
            completed_at: None,
            error: None,
            steps: Vec::new(),
        }
    }

    /// Hex rendering of the migration id.
    pub fn id(&self) -> String {
        hex::encode(self.migration_id)
    }

    pub fn start(&mut self) {
        self.status = MigrationStatus::Running;
    }

    pub fn push_step(&mut self, description: impl Into<String>, status: StepStatus) {
        self.steps.push(StepRecord {
            description: description.into(),
            status,
        });
    }

    pub fn complete(&mut self) {
        self.status = MigrationStatus::Complete;
        self.completed_at = Some(now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = MigrationStatus::Failed;
        self.completed_at = Some(now());
        self.error = Some(error.into());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, MigrationStatus::Complete | MigrationStatus::Failed)
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        // Values read back from sled carry no alignment guarantee.
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

fn now() -> i64 {
    Utc::now().timestamp_micros()
}

fn generate_migration_id(from: &str, to: &str, started_at: i64) -> [u8; 16] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(from.as_bytes());
    hasher.update(b"->");
    hasher.update(to.as_bytes());
    hasher.update(&started_at.to_le_bytes());
    let mut id = [0u8; 16];
    id.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
    id
}
