//! Column type definitions.

use serde::{Deserialize, Serialize};

/// Database-agnostic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Variable length string with a maximum length.
    Varchar(u32),
    /// Unbounded string.
    Text,
    /// 1-byte signed integer.
    Int1,
    /// 2-byte signed integer.
    Int2,
    /// 4-byte signed integer.
    Int4,
    /// 8-byte signed integer.
    Int8,
    /// Single precision float.
    Float,
    /// Double precision float.
    Double,
    /// Boolean.
    Bool,
    /// Calendar date.
    Date,
    /// Timestamp, optionally with time zone.
    Timestamp {
        /// Whether the timestamp carries a time zone.
        with_timezone: bool,
    },
}

impl ColumnType {
    /// Whether literal values of this type must be quoted.
    pub fn requires_quotes(&self) -> bool {
        matches!(
            self,
            ColumnType::Varchar(_) | ColumnType::Text | ColumnType::Date | ColumnType::Timestamp { .. }
        )
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Varchar(length) => write!(f, "varchar({})", length),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Int1 => write!(f, "int1"),
            ColumnType::Int2 => write!(f, "smallint"),
            ColumnType::Int4 => write!(f, "integer"),
            ColumnType::Int8 => write!(f, "bigint"),
            ColumnType::Float => write!(f, "real"),
            ColumnType::Double => write!(f, "double precision"),
            ColumnType::Bool => write!(f, "boolean"),
            ColumnType::Date => write!(f, "date"),
            ColumnType::Timestamp {
                with_timezone: true,
            } => write!(f, "timestamp with time zone"),
            ColumnType::Timestamp {
                with_timezone: false,
            } => write!(f, "timestamp"),
        }
    }
}
