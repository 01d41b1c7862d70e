//! Foreign key constraints between physical tables.

use serde::{Deserialize, Serialize};

/// A foreign key from columns of one table to columns of another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Table holding the referencing columns.
    pub referencing_table: String,
    /// Referencing columns, positionally matched with `referred_columns`.
    pub referencing_columns: Vec<String>,
    /// Table being referred to.
    pub referred_table: String,
    /// Referred columns.
    pub referred_columns: Vec<String>,
}

impl ForeignKey {
    /// Create a foreign key with a generated name.
    pub fn new(
        referencing_table: impl Into<String>,
        referencing_columns: impl IntoIterator<Item = impl Into<String>>,
        referred_table: impl Into<String>,
        referred_columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let referencing_table = referencing_table.into();
        let referencing_columns: Vec<String> =
            referencing_columns.into_iter().map(Into::into).collect();
        let name = format!("{}_{}_fkey", referencing_table, referencing_columns.join("_"));

        Self {
            name,
            referencing_table,
            referencing_columns,
            referred_table: referred_table.into(),
            referred_columns: referred_columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Override the generated constraint name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_self_referencing(&self) -> bool {
        self.referencing_table == self.referred_table
    }

    /// Copy this key onto another pair of physical tables.
    pub fn retarget(&self, referencing_table: &str, referred_table: &str) -> Self {
        Self {
            name: self.name.clone(),
            referencing_table: referencing_table.to_string(),
            referencing_columns: self.referencing_columns.clone(),
            referred_table: referred_table.to_string(),
            referred_columns: self.referred_columns.clone(),
        }
    }

    /// Whether any of the given columns takes part in this key.
    pub fn involves_any<'a>(&self, columns: impl IntoIterator<Item = &'a String>) -> bool {
        columns
            .into_iter()
            .any(|column| self.referencing_columns.contains(column))
    }
}
