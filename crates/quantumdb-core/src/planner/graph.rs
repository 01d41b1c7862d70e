//! Foreign key graph over the ghost tables of a plan.

use crate::catalog::{Catalog, ForeignKey};
use crate::error::Result;
use std::collections::{BTreeMap, BTreeSet};

/// Tables sharing the extreme count of a graph query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphResult {
    pub count: usize,
    pub tables: BTreeSet<String>,
}

/// Foreign keys between ghost tables, keyed by referencing table.
#[derive(Debug)]
pub struct ForeignKeyGraph<'a> {
    catalog: &'a Catalog,
    nodes: BTreeMap<String, Vec<&'a ForeignKey>>,
}

impl<'a> ForeignKeyGraph<'a> {
    pub fn from_catalog(catalog: &'a Catalog, tables: &BTreeSet<String>) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        for table in tables {
            let keys = catalog
                .table(table)?
                .foreign_keys()
                .iter()
                .filter(|key| tables.contains(&key.referred_table))
                .collect();
            nodes.insert(table.clone(), keys);
        }
        Ok(Self { catalog, nodes })
    }

    pub fn table_ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.nodes.contains_key(table)
    }

    /// Tables of `candidates` referring to the fewest other candidates.
    pub fn least_outgoing_foreign_keys(&self, candidates: &BTreeSet<String>) -> GraphResult {
        let counts = self.counts(candidates, |table, keys| {
            keys.iter()
                .filter(|key| !key.is_self_referencing())
                .map(|key| key.referred_table.as_str())
                .filter(|referred| *referred != table && candidates.contains(*referred))
                .collect::<BTreeSet<_>>()
                .len()
        });
        let minimum = counts.values().copied().min();
        Self::select(candidates, counts, minimum)
    }

    /// Tables of `candidates` referred to by the most NOT NULL keys.
    ///
    /// Referencing tables are counted once, whether they are ghosts or not.
    pub fn most_incoming_foreign_keys(&self, candidates: &BTreeSet<String>) -> GraphResult {
        let counts = self.counts(candidates, |table, _| {
            self.catalog
                .incoming_foreign_keys(table)
                .filter(|key| self.catalog.is_not_nullable(key))
                .map(|key| key.referencing_table.as_str())
                .collect::<BTreeSet<_>>()
                .len()
        });
        let maximum = counts.values().copied().max();
        Self::select(candidates, counts, maximum)
    }

    fn counts(
        &self,
        candidates: &BTreeSet<String>,
        count: impl Fn(&str, &[&ForeignKey]) -> usize,
    ) -> BTreeMap<&str, usize> {
        self.nodes
            .iter()
            .filter(|(table, _)| candidates.contains(*table))
            .map(|(table, keys)| (table.as_str(), count(table.as_str(), keys.as_slice())))
            .collect()
    }

    fn select(
        candidates: &BTreeSet<String>,
        counts: BTreeMap<&str, usize>,
        extreme: Option<usize>,
    ) -> GraphResult {
        match extreme {
            Some(extreme) => GraphResult {
                count: extreme,
                tables: counts
                    .into_iter()
                    .filter(|(_, count)| *count == extreme)
                    .map(|(table, _)| table.to_string())
                    .collect(),
            },
            None => GraphResult {
                count: 0,
                tables: candidates.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, ColumnType, Hint, Table};

    fn table(name: &str, references: &[&str]) -> Table {
        references.iter().fold(
            Table::new(name).with_column(Column::new("id", ColumnType::Int4).with_hint(Hint::Identity)),
            |table, referred| {
                table.with_column(
                    Column::new(format!("{}_id", referred), ColumnType::Int4).with_hint(Hint::NotNull),
                )
            },
        )
    }

    /// a -> b -> c, and d referring to a.
    fn catalog() -> Catalog {
        let mut catalog = Catalog::new("graph");
        for (name, references) in [("c", vec![]), ("b", vec!["c"]), ("a", vec!["b"]), ("d", vec!["a"])] {
            catalog.add_table(table(name, &references)).unwrap();
        }
        for (name, referred) in [("b", "c"), ("a", "b"), ("d", "a")] {
            catalog
                .add_foreign_key(ForeignKey::new(name, [format!("{}_id", referred)], referred, ["id"]))
                .unwrap();
        }
        catalog
    }

    fn set(tables: &[&str]) -> BTreeSet<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_least_outgoing() {
        let catalog = catalog();
        let graph = ForeignKeyGraph::from_catalog(&catalog, &set(&["a", "b", "c"])).unwrap();
        assert!(!graph.contains("d"));

        let least = graph.least_outgoing_foreign_keys(&set(&["a", "b", "c"]));
        assert_eq!(least, GraphResult { count: 0, tables: set(&["c"]) });

        let least = graph.least_outgoing_foreign_keys(&set(&["a", "b"]));
        assert_eq!(least, GraphResult { count: 0, tables: set(&["b"]) });
    }

    #[test]
    fn test_most_incoming() {
        let catalog = catalog();
        let graph = ForeignKeyGraph::from_catalog(&catalog, &set(&["a", "b", "c"])).unwrap();
        let most = graph.most_incoming_foreign_keys(&set(&["a", "b"]));
        assert_eq!(most.count, 1);
        assert_eq!(most.tables, set(&["a", "b"]));

        let empty = graph.most_incoming_foreign_keys(&set(&["x"]));
        assert_eq!(empty, GraphResult { count: 0, tables: set(&["x"]) });
    }
}
