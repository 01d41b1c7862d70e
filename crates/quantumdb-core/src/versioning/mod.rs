//! Schema history and table provenance.
//!
//! - [`Changelog`]: append-only chain of versions grouped in change sets
//! - [`RefLog`]: logical to physical table provenance with column ancestry
//! - [`TableMapping`]: logical name to physical id, per version
//! - [`State`]: everything persisted between migrations

pub mod changelog;
pub mod id;
pub mod ref_log;
pub mod state;
pub mod table_mapping;

pub use changelog::{ChangeSet, Changelog, CurrentVersion, Version};
pub use ref_log::{ColumnRef, ColumnRefId, NewColumnRef, RefLog, SyncRef, SyncRefId, TableRef, TableRefId};
pub use state::State;
pub use table_mapping::{TableMapping, TableMappingNode};
