//! Schema operation value objects.
//!
//! Every operation is validated when it is constructed: required names must
//! be non-empty and builders refuse to produce an incomplete operation.

use crate::catalog::{Column, ColumnType, Hint};
use crate::error::{check_state, require_non_empty, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Definition of a column to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub column_type: ColumnType,
    /// Default value expression.
    pub default_value: Option<String>,
    /// Constraint hints.
    pub hints: BTreeSet<Hint>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Result<Self> {
        let name = name.into();
        require_non_empty(&name, "name")?;
        Ok(Self {
            name,
            column_type,
            default_value: None,
            hints: BTreeSet::new(),
        })
    }

    pub fn with_hints(mut self, hints: impl IntoIterator<Item = Hint>) -> Self {
        self.hints.extend(hints);
        self
    }

    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default_value = Some(expression.into());
        self
    }

    pub fn is_identity(&self) -> bool {
        self.hints.contains(&Hint::Identity)
    }

    pub fn is_not_null(&self) -> bool {
        self.hints.contains(&Hint::NotNull)
    }

    /// Build the catalog column this definition describes.
    pub fn create_column(&self) -> Column {
        let column = Column::new(self.name.clone(), self.column_type).with_hints(self.hints.iter().copied());
        match &self.default_value {
            Some(expression) => column.with_default(expression.clone()),
            None => column,
        }
    }
}

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaOperation {
    /// Create a new table.
    CreateTable(CreateTable),
    /// Drop a table.
    DropTable {
        /// Logical table name.
        table: String,
    },
    /// Create a new table holding a copy of an existing one.
    CopyTable {
        /// Logical name of the table to copy.
        source: String,
        /// Logical name of the copy.
        target: String,
    },
    /// Rename a table.
    RenameTable {
        /// Current logical name.
        table: String,
        /// New logical name.
        new_name: String,
    },
    /// Add a column to a table.
    AddColumn {
        /// Logical table name.
        table: String,
        /// The column to add.
        column: ColumnDefinition,
    },
    /// Drop a column from a table.
    DropColumn {
        /// Logical table name.
        table: String,
        /// Column to drop.
        column: String,
    },
    /// Alter an existing column.
    AlterColumn(AlterColumn),
    /// Add a foreign key.
    AddForeignKey {
        /// Logical name of the referencing table.
        table: String,
        /// Referencing columns.
        columns: Vec<String>,
        /// Logical name of the referred table.
        referred_table: String,
        /// Referred columns.
        referred_columns: Vec<String>,
        /// Constraint name.
        name: String,
    },
    /// Drop a foreign key.
    DropForeignKey {
        /// Logical name of the referencing table.
        table: String,
        /// Constraint name.
        name: String,
    },
    /// Merge the rows of two identically shaped tables into a new table.
    MergeTable {
        /// Logical name of the first input.
        left: String,
        /// Logical name of the second input.
        right: String,
        /// Logical name of the merged table.
        target: String,
    },
    /// Join columns of several tables into a new table.
    JoinTable(JoinTable),
    /// Split the rows of a table into several tables.
    PartitionTable(PartitionTable),
    /// Split the columns of a table into several tables.
    DecomposeTable(DecomposeTable),
    /// Execute a raw data statement.
    Execute {
        /// Statement text.
        statement: String,
    },
}

impl SchemaOperation {
    pub fn create_table(table: impl Into<String>) -> Result<CreateTable> {
        let table = table.into();
        require_non_empty(&table, "tableName")?;
        Ok(CreateTable {
            table,
            columns: Vec::new(),
        })
    }

    pub fn drop_table(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        require_non_empty(&table, "tableName")?;
        Ok(SchemaOperation::DropTable { table })
    }

    pub fn copy_table(source: impl Into<String>, target: impl Into<String>) -> Result<Self> {
        let (source, target) = (source.into(), target.into());
        require_non_empty(&source, "sourceTableName")?;
        require_non_empty(&target, "targetTableName")?;
        Ok(SchemaOperation::CopyTable { source, target })
    }

    pub fn rename_table(table: impl Into<String>, new_name: impl Into<String>) -> Result<Self> {
        let (table, new_name) = (table.into(), new_name.into());
        require_non_empty(&table, "tableName")?;
        require_non_empty(&new_name, "newTableName")?;
        Ok(SchemaOperation::RenameTable { table, new_name })
    }

    pub fn add_column(table: impl Into<String>, column: ColumnDefinition) -> Result<Self> {
        let table = table.into();
        require_non_empty(&table, "tableName")?;
        Ok(SchemaOperation::AddColumn { table, column })
    }

    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Result<Self> {
        let (table, column) = (table.into(), column.into());
        require_non_empty(&table, "tableName")?;
        require_non_empty(&column, "columnName")?;
        Ok(SchemaOperation::DropColumn { table, column })
    }

    pub fn alter_column(table: impl Into<String>, column: impl Into<String>) -> Result<AlterColumn> {
        let (table, column) = (table.into(), column.into());
        require_non_empty(&table, "tableName")?;
        require_non_empty(&column, "columnName")?;
        Ok(AlterColumn {
            table,
            column,
            new_name: None,
            new_type: None,
            new_default: None,
            drop_default: false,
            hints_to_add: BTreeSet::new(),
            hints_to_drop: BTreeSet::new(),
        })
    }

    pub fn add_foreign_key(
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
        referred_table: impl Into<String>,
        referred_columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let table = table.into();
        let referred_table = referred_table.into();
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let referred_columns: Vec<String> = referred_columns.into_iter().map(Into::into).collect();
        require_non_empty(&table, "tableName")?;
        require_non_empty(&referred_table, "referredTableName")?;
        if columns.is_empty() || columns.len() != referred_columns.len() {
            return Err(Error::invalid_argument(
                "You must refer to as many columns as you are referring from.",
            ));
        }
        let name = format!("{}_{}_fkey", table, columns.join("_"));
        Ok(SchemaOperation::AddForeignKey {
            table,
            columns,
            referred_table,
            referred_columns,
            name,
        })
    }

    pub fn drop_foreign_key(table: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let (table, name) = (table.into(), name.into());
        require_non_empty(&table, "tableName")?;
        require_non_empty(&name, "foreignKeyName")?;
        Ok(SchemaOperation::DropForeignKey { table, name })
    }

    pub fn merge_table(
        left: impl Into<String>,
        right: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<Self> {
        let (left, right, target) = (left.into(), right.into(), target.into());
        require_non_empty(&left, "leftTableName")?;
        require_non_empty(&right, "rightTableName")?;
        require_non_empty(&target, "targetTableName")?;
        Ok(SchemaOperation::MergeTable {
            left,
            right,
            target,
        })
    }

    pub fn join_table(
        source: impl Into<String>,
        alias: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<JoinTable> {
        let (source, alias) = (source.into(), alias.into());
        require_non_empty(&source, "sourceTable")?;
        require_non_empty(&alias, "alias")?;
        let mut join = JoinTable {
            source_tables: BTreeMap::new(),
            aliases: vec![alias.clone()],
            source_columns: BTreeMap::new(),
            join_conditions: BTreeMap::new(),
            target: None,
        };
        join.source_tables.insert(alias.clone(), source);
        join.source_columns
            .insert(alias, columns.into_iter().map(Into::into).collect());
        Ok(join)
    }

    pub fn partition_table(table: impl Into<String>) -> Result<PartitionTable> {
        let table = table.into();
        require_non_empty(&table, "tableName")?;
        Ok(PartitionTable {
            table,
            partitions: Vec::new(),
        })
    }

    pub fn decompose_table(table: impl Into<String>) -> Result<DecomposeTable> {
        let table = table.into();
        require_non_empty(&table, "tableName")?;
        Ok(DecomposeTable {
            table,
            decompositions: Vec::new(),
        })
    }

    pub fn execute(statement: impl Into<String>) -> Result<Self> {
        let statement = statement.into();
        require_non_empty(&statement, "statement")?;
        Ok(SchemaOperation::Execute { statement })
    }

    /// Whether this operation changes data rather than schema.
    pub fn is_data_operation(&self) -> bool {
        matches!(self, SchemaOperation::Execute { .. })
    }
}

impl std::fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaOperation::CreateTable(op) => write!(f, "CREATE TABLE {}", op.table),
            SchemaOperation::DropTable { table } => write!(f, "DROP TABLE {}", table),
            SchemaOperation::CopyTable { source, target } => {
                write!(f, "COPY TABLE {} AS {}", source, target)
            }
            SchemaOperation::RenameTable { table, new_name } => {
                write!(f, "RENAME TABLE {} TO {}", table, new_name)
            }
            SchemaOperation::AddColumn { table, column } => {
                write!(f, "ADD COLUMN {}.{} {}", table, column.name, column.column_type)
            }
            SchemaOperation::DropColumn { table, column } => {
                write!(f, "DROP COLUMN {}.{}", table, column)
            }
            SchemaOperation::AlterColumn(op) => write!(f, "ALTER COLUMN {}.{}", op.table, op.column),
            SchemaOperation::AddForeignKey { table, name, .. } => {
                write!(f, "ADD FOREIGN KEY {} ON {}", name, table)
            }
            SchemaOperation::DropForeignKey { table, name } => {
                write!(f, "DROP FOREIGN KEY {} ON {}", name, table)
            }
            SchemaOperation::MergeTable {
                left,
                right,
                target,
            } => write!(f, "MERGE TABLE {} AND {} INTO {}", left, right, target),
            SchemaOperation::JoinTable(op) => write!(
                f,
                "JOIN TABLE {:?} INTO {}",
                op.source_tables.values().collect::<Vec<_>>(),
                op.target.as_deref().unwrap_or("?")
            ),
            SchemaOperation::PartitionTable(op) => write!(f, "PARTITION TABLE {}", op.table),
            SchemaOperation::DecomposeTable(op) => write!(f, "DECOMPOSE TABLE {}", op.table),
            SchemaOperation::Execute { statement } => write!(f, "EXECUTE {}", statement),
        }
    }
}

/// Builder for a CreateTable operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTable {
    /// Logical table name.
    pub table: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDefinition>,
}

impl CreateTable {
    /// Append a column definition.
    pub fn with(mut self, column: ColumnDefinition) -> Result<Self> {
        check_state(!self.columns.iter().any(|c| c.name == column.name), || {
            format!("Table: {} already defines column: {}", self.table, column.name)
        })?;
        self.columns.push(column);
        Ok(self)
    }

    pub fn build(self) -> Result<SchemaOperation> {
        if self.columns.is_empty() {
            return Err(Error::invalid_argument(format!(
                "Table: '{}' doesn't contain any columns.",
                self.table
            )));
        }
        if !self.columns.iter().any(ColumnDefinition::is_identity) {
            return Err(Error::invalid_argument(format!(
                "Table: '{}' has no identity columns.",
                self.table
            )));
        }
        Ok(SchemaOperation::CreateTable(self))
    }
}

/// Alteration of an existing column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterColumn {
    /// Logical table name.
    pub table: String,
    /// Column to alter.
    pub column: String,
    /// New column name.
    pub new_name: Option<String>,
    /// New column type.
    pub new_type: Option<ColumnType>,
    /// New default expression.
    pub new_default: Option<String>,
    /// Whether to drop the default expression.
    pub drop_default: bool,
    /// Hints to add.
    pub hints_to_add: BTreeSet<Hint>,
    /// Hints to drop.
    pub hints_to_drop: BTreeSet<Hint>,
}

impl AlterColumn {
    pub fn rename(mut self, new_name: impl Into<String>) -> Result<Self> {
        let new_name = new_name.into();
        require_non_empty(&new_name, "newColumnName")?;
        self.new_name = Some(new_name);
        Ok(self)
    }

    pub fn modify_data_type(mut self, column_type: ColumnType) -> Self {
        self.new_type = Some(column_type);
        self
    }

    pub fn modify_default_expression(mut self, expression: impl Into<String>) -> Result<Self> {
        let expression = expression.into();
        require_non_empty(&expression, "newDefaultExpression")?;
        self.new_default = Some(expression);
        self.drop_default = false;
        Ok(self)
    }

    pub fn drop_default_expression(mut self) -> Self {
        self.new_default = None;
        self.drop_default = true;
        self
    }

    pub fn add_hint(mut self, hint: Hint) -> Self {
        self.hints_to_drop.remove(&hint);
        self.hints_to_add.insert(hint);
        self
    }

    pub fn drop_hint(mut self, hint: Hint) -> Self {
        self.hints_to_add.remove(&hint);
        self.hints_to_drop.insert(hint);
        self
    }

    pub fn build(self) -> Result<SchemaOperation> {
        Ok(SchemaOperation::AlterColumn(self))
    }
}

/// Join of several aliased source tables into one target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTable {
    /// Alias to logical source table name.
    pub source_tables: BTreeMap<String, String>,
    /// Aliases in declaration order.
    pub aliases: Vec<String>,
    /// Alias to the columns taken from that source.
    pub source_columns: BTreeMap<String, Vec<String>>,
    /// Alias to its join condition. The first alias has none.
    pub join_conditions: BTreeMap<String, String>,
    /// Logical name of the joined table.
    pub target: Option<String>,
}

impl JoinTable {
    pub fn with(
        mut self,
        source: impl Into<String>,
        alias: impl Into<String>,
        join_condition: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let (source, alias, join_condition) = (source.into(), alias.into(), join_condition.into());
        require_non_empty(&source, "sourceTable")?;
        require_non_empty(&alias, "alias")?;
        require_non_empty(&join_condition, "joinCondition")?;
        if self.source_tables.contains_key(&alias) {
            return Err(Error::invalid_argument(format!(
                "You have ambiguously used the alias: '{}'.",
                alias
            )));
        }

        self.source_tables.insert(alias.clone(), source);
        self.source_columns
            .insert(alias.clone(), columns.into_iter().map(Into::into).collect());
        self.join_conditions.insert(alias.clone(), join_condition);
        self.aliases.push(alias);
        Ok(self)
    }

    /// Name the target table and finish the operation.
    pub fn into_table(mut self, target: impl Into<String>) -> Result<SchemaOperation> {
        let target = target.into();
        require_non_empty(&target, "tableName")?;
        if self.source_columns.values().all(Vec::is_empty) {
            return Err(Error::invalid_argument(
                "You must specify which columns to join into the target table.",
            ));
        }
        self.target = Some(target);
        Ok(SchemaOperation::JoinTable(self))
    }
}

/// Row-wise split of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionTable {
    /// Logical name of the table to partition.
    pub table: String,
    /// Target table name and the row predicate selecting its rows.
    pub partitions: Vec<(String, String)>,
}

impl PartitionTable {
    pub fn into_partition(
        mut self,
        target: impl Into<String>,
        expression: impl Into<String>,
    ) -> Result<Self> {
        let (target, expression) = (target.into(), expression.into());
        require_non_empty(&target, "tableName")?;
        require_non_empty(&expression, "expression")?;
        if self.partitions.iter().any(|(name, _)| *name == target) {
            return Err(Error::invalid_argument(
                "You cannot partition into the same table multiple times.",
            ));
        }
        self.partitions.push((target, expression));
        Ok(self)
    }

    pub fn build(self) -> Result<SchemaOperation> {
        if self.partitions.is_empty() {
            return Err(Error::invalid_argument(
                "You must specify at least one partition.",
            ));
        }
        Ok(SchemaOperation::PartitionTable(self))
    }
}

/// Column-wise split of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecomposeTable {
    /// Logical name of the table to decompose.
    pub table: String,
    /// Target table name and the columns it receives.
    pub decompositions: Vec<(String, Vec<String>)>,
}

impl DecomposeTable {
    pub fn into_table(
        mut self,
        target: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let target = target.into();
        require_non_empty(&target, "tableName")?;
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(Error::invalid_argument(
                "You must specify at least one column to decompose.",
            ));
        }
        match self.decompositions.iter_mut().find(|(name, _)| *name == target) {
            Some((_, existing)) => existing.extend(columns),
            None => self.decompositions.push((target, columns)),
        }
        Ok(self)
    }

    pub fn build(self) -> Result<SchemaOperation> {
        if self.decompositions.is_empty() {
            return Err(Error::invalid_argument(
                "You must specify at least one decomposition.",
            ));
        }
        Ok(SchemaOperation::DecomposeTable(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_names_are_rejected() {
        assert!(SchemaOperation::drop_table("").unwrap_err().is_argument_error());
        assert!(SchemaOperation::rename_table("users", " ").is_err());
        assert!(SchemaOperation::drop_column("users", "").is_err());
        assert!(ColumnDefinition::new("", ColumnType::Int4).is_err());
    }

    #[test]
    fn test_create_table_requires_identity() {
        let op = SchemaOperation::create_table("users")
            .unwrap()
            .with(ColumnDefinition::new("name", ColumnType::Text).unwrap())
            .unwrap();
        assert!(op.build().is_err());

        let op = SchemaOperation::create_table("users")
            .unwrap()
            .with(
                ColumnDefinition::new("id", ColumnType::Int8)
                    .unwrap()
                    .with_hints([Hint::Identity, Hint::NotNull]),
            )
            .unwrap()
            .build()
            .unwrap();
        assert!(matches!(op, SchemaOperation::CreateTable(ref t) if t.columns.len() == 1));
    }

    #[test]
    fn test_alter_column_hints_cancel_out() {
        let op = SchemaOperation::alter_column("users", "name")
            .unwrap()
            .add_hint(Hint::NotNull)
            .drop_hint(Hint::NotNull);
        assert!(op.hints_to_add.is_empty());
        assert!(op.hints_to_drop.contains(&Hint::NotNull));
    }

    #[test]
    fn test_join_table_rejects_duplicate_alias() {
        let join = SchemaOperation::join_table("users", "u", ["id", "name"])
            .unwrap()
            .with("addresses", "a", "u.id = a.user_id", ["street"])
            .unwrap();
        let err = join
            .clone()
            .with("orders", "a", "u.id = a.user_id", ["total"])
            .unwrap_err();
        assert!(err.is_argument_error());

        let op = join.into_table("users_with_addresses").unwrap();
        assert!(matches!(op, SchemaOperation::JoinTable(ref j) if j.aliases == vec!["u", "a"]));
    }

    #[test]
    fn test_partition_rejects_duplicate_target() {
        let partition = SchemaOperation::partition_table("orders")
            .unwrap()
            .into_partition("small_orders", "total < 100")
            .unwrap();
        assert!(partition
            .clone()
            .into_partition("small_orders", "total < 10")
            .is_err());
        assert!(partition.build().is_ok());
    }

    #[test]
    fn test_execute_is_data_operation() {
        let op = SchemaOperation::execute("UPDATE users SET active = true").unwrap();
        assert!(op.is_data_operation());
        assert!(!SchemaOperation::drop_table("users").unwrap().is_data_operation());
    }

    #[test]
    fn test_add_foreign_key_column_count() {
        assert!(SchemaOperation::add_foreign_key("a", ["x", "y"], "b", ["id"]).is_err());
        let op = SchemaOperation::add_foreign_key("a", ["b_id"], "b", ["id"]).unwrap();
        assert!(matches!(op, SchemaOperation::AddForeignKey { ref name, .. } if name == "a_b_id_fkey"));
    }
}
