//! Schema catalog.
//!
//! The catalog is the live snapshot of the physical schema: tables are keyed
//! by their physical identifier, which is also the name stored on the
//! [`Table`]. Logical table names live in the reference log, not here.

mod catalog;
mod column;
mod foreign_key;
mod table;
mod types;

pub use catalog::Catalog;
pub use column::{Column, Hint};
pub use foreign_key::ForeignKey;
pub use table::Table;
pub use types::ColumnType;
