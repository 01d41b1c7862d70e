//! Schema evolution between versions.
//!
//! This module provides:
//! - Path finding and staging over the version graph
//! - Column-level data mappings and their transitive closure
//! - Expansion of schema operations into ghost tables
//! - The migrator driving a backend from one version to another

pub mod data_mapping;
pub mod migrator;
pub mod operations;
pub mod record;
pub mod traverser;

pub use data_mapping::{ColumnMapping, DataMapping, DataMappings, Transformation};
pub use migrator::{MigrationSummary, Migrator};
pub use operations::SchemaOperationsMigrator;
pub use record::{MigrationRecord, MigrationStatus, StepRecord, StepStatus};
pub use traverser::{Direction, Stage, StageKind, VersionTraverser};
