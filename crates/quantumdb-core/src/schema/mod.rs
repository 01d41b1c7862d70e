//! Schema operations: the changes a version applies to its parent's schema.

mod operations;

pub use operations::{
    AlterColumn, ColumnDefinition, CreateTable, DecomposeTable, JoinTable, PartitionTable,
    SchemaOperation,
};
