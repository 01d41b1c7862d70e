//! Path search over the version chain.

use crate::error::{check_state, Error, Result};
use crate::versioning::{Changelog, State, Version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Direction of travel through the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forwards,
    Backwards,
}

/// Whether a stage changes the schema or only the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    Ddl,
    Dml,
}

/// Consecutive versions of the same kind, applied together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    kind: StageKind,
    versions: Vec<String>,
    parent: String,
}

impl Stage {
    fn new(kind: StageKind, first: String, parent: String) -> Self {
        Self {
            kind,
            versions: vec![first],
            parent,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// The version the stage starts from.
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn first(&self) -> &str {
        // A stage is created with one version and only grows.
        &self.versions[0]
    }

    pub fn last(&self) -> &str {
        &self.versions[self.versions.len() - 1]
    }
}

#[derive(Clone, Copy)]
struct Edges {
    children: bool,
    parents: bool,
}

/// Breadth-first search over a changelog.
pub struct VersionTraverser;

impl VersionTraverser {
    /// Shortest path in either direction.
    pub fn find_path<'a>(changelog: &'a Changelog, from: &str, to: &str) -> Option<Vec<&'a Version>> {
        Self::search(changelog, from, to, Edges { children: true, parents: true })
    }

    /// Path following child links only.
    pub fn find_child_path<'a>(changelog: &'a Changelog, from: &str, to: &str) -> Option<Vec<&'a Version>> {
        Self::search(changelog, from, to, Edges { children: true, parents: false })
    }

    /// Path following parent links only.
    pub fn find_parent_path<'a>(changelog: &'a Changelog, from: &str, to: &str) -> Option<Vec<&'a Version>> {
        Self::search(changelog, from, to, Edges { children: false, parents: true })
    }

    fn search<'a>(
        changelog: &'a Changelog,
        from: &str,
        to: &str,
        edges: Edges,
    ) -> Option<Vec<&'a Version>> {
        let start = changelog.lookup(from)?;
        changelog.lookup(to)?;
        if from == to {
            return Some(vec![start]);
        }

        let mut predecessor: BTreeMap<&str, &str> = BTreeMap::new();
        let mut to_process = VecDeque::from([start]);
        let mut found = false;

        while let Some(current) = to_process.pop_front() {
            let adjacent = [
                current.child().filter(|_| edges.children),
                current.parent().filter(|_| edges.parents),
            ];
            for next in adjacent.into_iter().flatten() {
                if next == from || predecessor.contains_key(next) {
                    continue;
                }
                predecessor.insert(next, current.id());
                if next == to {
                    found = true;
                    break;
                }
                if let Some(version) = changelog.lookup(next) {
                    to_process.push_back(version);
                }
            }
            if found {
                break;
            }
        }

        if !found {
            return None;
        }

        let mut path = vec![changelog.lookup(to)?];
        let mut pointer = to;
        while pointer != from {
            pointer = *predecessor.get(pointer)?;
            path.push(changelog.lookup(pointer)?);
        }
        path.reverse();
        Some(path)
    }

    /// Direction from one version to another, by generation.
    ///
    /// `None` when both versions sit at the same generation or either is unknown.
    pub fn get_direction(changelog: &Changelog, from: &str, to: &str) -> Option<Direction> {
        let from_generation = changelog.depth(from)?;
        let to_generation = changelog.depth(to)?;
        match from_generation.cmp(&to_generation) {
            std::cmp::Ordering::Greater => Some(Direction::Backwards),
            std::cmp::Ordering::Less => Some(Direction::Forwards),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The earliest of a set of versions.
    pub fn get_first<'a>(changelog: &'a Changelog, versions: &BTreeSet<String>) -> Option<&'a Version> {
        versions
            .iter()
            .filter_map(|id| Some((changelog.depth(id)?, changelog.lookup(id)?)))
            .min_by_key(|(depth, _)| *depth)
            .map(|(_, version)| version)
    }

    /// Check the database sits at `from` and split the path to `to` into stages.
    pub fn verify_path_and_state(state: &State, from: &str, to: &str) -> Result<Vec<Stage>> {
        let changelog = &state.changelog;
        let from_version = changelog.get_version(from)?;
        changelog.get_version(to)?;

        let active = state.ref_log.versions();
        if active.is_empty() {
            check_state(from_version.is_root(), || {
                "Database is not initialized yet, you must start migrating from the root node.".to_string()
            })?;
        } else {
            check_state(active.contains(from), || {
                format!(
                    "The database is not at version: '{}' but at: '{:?}'.",
                    from, active
                )
            })?;
        }

        let path = Self::find_child_path(changelog, from, to).ok_or_else(|| Error::NoPath {
            from: from.to_string(),
            to: to.to_string(),
        })?;

        let mut stages: Vec<Stage> = Vec::new();
        let mut pointer = from.to_string();
        for version in path.into_iter().skip(1) {
            let kind = match version.operation() {
                Some(operation) if operation.is_data_operation() => StageKind::Dml,
                _ => StageKind::Ddl,
            };
            match stages.last_mut() {
                Some(stage) if stage.kind == kind => stage.versions.push(version.id().to_string()),
                _ => stages.push(Stage::new(kind, version.id().to_string(), pointer)),
            }
            pointer = version.id().to_string();
        }
        Ok(stages)
    }
}
