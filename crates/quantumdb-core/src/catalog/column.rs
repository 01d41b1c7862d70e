//! Column definitions.

use super::types::ColumnType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Constraint hints attached to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Hint {
    /// The column may not contain NULL.
    NotNull,
    /// Values are generated from a sequence.
    AutoIncrement,
    /// The column is part of the table's identity (primary key).
    Identity,
}

impl std::fmt::Display for Hint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hint::NotNull => write!(f, "NOT_NULL"),
            Hint::AutoIncrement => write!(f, "AUTO_INCREMENT"),
            Hint::Identity => write!(f, "IDENTITY"),
        }
    }
}

/// A column within a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub column_type: ColumnType,
    /// Default value expression.
    pub default_value: Option<String>,
    hints: BTreeSet<Hint>,
}

impl Column {
    /// Create a nullable column without hints.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            default_value: None,
            hints: BTreeSet::new(),
        }
    }

    /// Add a hint.
    pub fn with_hint(mut self, hint: Hint) -> Self {
        self.hints.insert(hint);
        self
    }

    /// Add several hints.
    pub fn with_hints(mut self, hints: impl IntoIterator<Item = Hint>) -> Self {
        self.hints.extend(hints);
        self
    }

    /// Set the default value expression.
    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default_value = Some(expression.into());
        self
    }

    pub fn hints(&self) -> &BTreeSet<Hint> {
        &self.hints
    }

    pub fn is_identity(&self) -> bool {
        self.hints.contains(&Hint::Identity)
    }

    pub fn is_not_null(&self) -> bool {
        self.hints.contains(&Hint::NotNull)
    }

    pub fn is_auto_increment(&self) -> bool {
        self.hints.contains(&Hint::AutoIncrement)
    }

    pub fn add_hint(&mut self, hint: Hint) {
        self.hints.insert(hint);
    }

    pub fn drop_hint(&mut self, hint: Hint) {
        self.hints.remove(&hint);
    }

    pub fn modify_type(&mut self, column_type: ColumnType) {
        self.column_type = column_type;
    }

    /// Replace the default expression. A literal default replaces any sequence.
    pub fn modify_default_value(&mut self, expression: impl Into<String>) {
        self.default_value = Some(expression.into());
        self.hints.remove(&Hint::AutoIncrement);
    }

    pub fn drop_default_value(&mut self) {
        self.default_value = None;
        self.hints.remove(&Hint::AutoIncrement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints() {
        let column = Column::new("id", ColumnType::Int8)
            .with_hints([Hint::Identity, Hint::AutoIncrement, Hint::NotNull]);

        assert!(column.is_identity());
        assert!(column.is_auto_increment());
        assert!(column.is_not_null());
    }

    #[test]
    fn test_modify_default_drops_auto_increment() {
        let mut column = Column::new("id", ColumnType::Int8).with_hint(Hint::AutoIncrement);
        column.modify_default_value("0");

        assert_eq!(column.default_value.as_deref(), Some("0"));
        assert!(!column.is_auto_increment());

        column.drop_default_value();
        assert!(column.default_value.is_none());
    }
}
