//! Data operations carried by plan steps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Kind of data operation a step performs on ghost tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// Insert placeholder rows so NOT NULL keys can be satisfied early.
    AddNull,
    /// Copy (a subset of) the columns of a table into its ghost.
    Copy,
    /// Remove the placeholder rows again.
    DropNull,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::AddNull => write!(f, "ADD_NULL"),
            OperationType::Copy => write!(f, "COPY"),
            OperationType::DropNull => write!(f, "DROP_NULL"),
        }
    }
}

/// A data operation on one or more ghost tables.
///
/// `COPY` operations always target a single table and list the columns
/// they migrate, in table order. Placeholder operations carry no columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    op_type: OperationType,
    tables: BTreeSet<String>,
    columns: Vec<String>,
}

impl Operation {
    pub fn add_null(tables: BTreeSet<String>) -> Self {
        Self {
            op_type: OperationType::AddNull,
            tables,
            columns: Vec::new(),
        }
    }

    pub fn copy(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            op_type: OperationType::Copy,
            tables: BTreeSet::from([table.into()]),
            columns,
        }
    }

    pub fn drop_null(tables: BTreeSet<String>) -> Self {
        Self {
            op_type: OperationType::DropNull,
            tables,
            columns: Vec::new(),
        }
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The table of a single-table operation such as `COPY`.
    pub fn table(&self) -> Option<&str> {
        self.tables.iter().next().map(String::as_str)
    }

    pub fn covers(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    pub(crate) fn add_table(&mut self, table: impl Into<String>) {
        self.tables.insert(table.into());
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables: Vec<&str> = self.tables.iter().map(String::as_str).collect();
        write!(f, "{} [{}]", self.op_type, tables.join(", "))?;
        if !self.columns.is_empty() {
            write!(f, " [{}]", self.columns.join(", "))?;
        }
        Ok(())
    }
}
