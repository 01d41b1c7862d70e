//! QuantumDB Core - zero-downtime schema evolution.
//!
//! Every schema change is a version in an append-only changelog. Changed
//! tables are never altered in place: each version gets ghost tables that
//! are created next to the live ones, kept in sync through data mappings
//! and populated by a dependency-ordered migration plan, so old and new
//! versions of the schema can be served at the same time.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod migration;
pub mod planner;
pub mod schema;
pub mod versioning;

pub use backend::{Backend, BackendKind, MemoryBackend, SledBackend};
pub use catalog::{Catalog, Column, ColumnType, ForeignKey, Hint, Table};
pub use config::MigratorConfig;
pub use error::{Error, Result};
pub use migration::{
    DataMapping, DataMappings, Direction, MigrationRecord, MigrationStatus, MigrationSummary,
    Migrator, SchemaOperationsMigrator, VersionTraverser,
};
pub use planner::{
    GreedyMigrationPlanner, MigrationPlanner, Operation, OperationType, Plan, PlanValidator, Step,
};
pub use schema::{ColumnDefinition, SchemaOperation};
pub use versioning::{ChangeSet, Changelog, CurrentVersion, RefLog, State, TableMapping, Version};
