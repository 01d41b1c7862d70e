//! The version graph: versions, change sets and the changelog holding them.
//!
//! History is append-only and singly branching. Each [`Version`] records the
//! operation that produced it, links to its parent once at creation, and can
//! receive exactly one child. Versions are stored in an arena keyed by id so
//! that parent/child links are plain identifiers.

use super::id;
use crate::error::{check_state, require_non_empty, Error, Result};
use crate::schema::SchemaOperation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// A node in the schema history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    id: String,
    parent: Option<String>,
    child: Option<String>,
    operation: Option<SchemaOperation>,
    change_set: Option<usize>,
}

impl Version {
    fn new(
        id: impl Into<String>,
        operation: Option<SchemaOperation>,
        change_set: Option<usize>,
    ) -> Result<Self> {
        let id = id.into();
        require_non_empty(&id, "id")?;
        Ok(Self {
            id,
            parent: None,
            child: None,
            operation,
            change_set,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn child(&self) -> Option<&str> {
        self.child.as_deref()
    }

    /// The operation that produced this version. `None` for the root.
    pub fn operation(&self) -> Option<&SchemaOperation> {
        self.operation.as_ref()
    }

    /// Index of the change set this version belongs to.
    pub fn change_set(&self) -> Option<usize> {
        self.change_set
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A batch of operations sharing an author and description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    author: String,
    description: Option<String>,
    created: DateTime<Utc>,
    versions: Vec<String>,
}

impl ChangeSet {
    /// Create a change set stamped with the current time.
    pub fn new(author: impl Into<String>, description: Option<String>) -> Result<Self> {
        Self::created_at(author, description, Utc::now())
    }

    /// Create a change set with an explicit creation time.
    pub fn created_at(
        author: impl Into<String>,
        description: Option<String>,
        created: DateTime<Utc>,
    ) -> Result<Self> {
        let author = author.into();
        require_non_empty(&author, "author")?;
        Ok(Self {
            author,
            description: description.filter(|d| !d.trim().is_empty()),
            created,
            versions: Vec::new(),
        })
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Versions created for this change set, one per operation, oldest first.
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// The last version created for this change set.
    pub fn version(&self) -> Option<&str> {
        self.versions.last().map(String::as_str)
    }
}

impl PartialOrd for ChangeSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChangeSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created
            .cmp(&other.created)
            .then_with(|| self.versions.cmp(&other.versions))
    }
}

/// Caller-held position in a changelog.
///
/// Appending advances the position the caller passes in, so two callers
/// reading the same changelog never observe each other's position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrentVersion(String);

impl CurrentVersion {
    pub fn new(id: impl Into<String>) -> Self {
        CurrentVersion(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CurrentVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The history of schema changes, rooted at a single version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changelog {
    root: String,
    versions: BTreeMap<String, Version>,
    change_sets: Vec<ChangeSet>,
}

impl Changelog {
    /// Create a changelog whose root id is derived from the current time.
    pub fn new() -> Result<Self> {
        let seed = Utc::now().to_rfc3339();
        let root = id::generate(&seed, |_| false)
            .ok_or_else(|| Error::illegal_state("Unable to generate a root version id"))?;
        Self::with_root(root)
    }

    /// Create a changelog with the given root version id.
    pub fn with_root(root_id: impl Into<String>) -> Result<Self> {
        let root = Version::new(root_id, None, None)?;
        let mut versions = BTreeMap::new();
        let id = root.id.clone();
        versions.insert(id.clone(), root);
        Ok(Self {
            root: id,
            versions,
            change_sets: Vec::new(),
        })
    }

    pub fn root(&self) -> &Version {
        // The root is inserted on construction and never removed.
        &self.versions[&self.root]
    }

    /// Position at the root, for callers starting from an empty history.
    pub fn root_position(&self) -> CurrentVersion {
        CurrentVersion::new(self.root.clone())
    }

    /// The tail of the chain.
    pub fn last_version(&self) -> &Version {
        let mut pointer = self.root();
        while let Some(child) = pointer.child().and_then(|id| self.versions.get(id)) {
            pointer = child;
        }
        pointer
    }

    pub fn change_sets(&self) -> &[ChangeSet] {
        &self.change_sets
    }

    pub fn change_set(&self, index: usize) -> Option<&ChangeSet> {
        self.change_sets.get(index)
    }

    /// Append a change set after `current`, one version per operation.
    ///
    /// `current` is advanced to the last created version.
    pub fn add_change_set(
        &mut self,
        current: &mut CurrentVersion,
        mut change_set: ChangeSet,
        operations: Vec<SchemaOperation>,
    ) -> Result<&ChangeSet> {
        if operations.is_empty() {
            return Err(Error::invalid_argument(
                "A change set must contain at least one operation.",
            ));
        }
        let append_to = self.require(current.id())?;
        check_state(append_to.child.is_none(), || {
            format!(
                "Version: {} already has a child; history cannot branch",
                current.id()
            )
        })?;

        let index = self.change_sets.len();
        let mut parent = current.id().to_string();
        for operation in operations {
            let seed = format!("{}:{}", parent, index);
            let id = id::generate(&seed, |candidate| self.versions.contains_key(candidate))
                .ok_or_else(|| Error::illegal_state("Unable to generate a unique version id"))?;

            let version = Version::new(id.clone(), Some(operation), Some(index))?;
            self.versions.insert(id.clone(), version);
            self.link(&parent, &id)?;
            debug!(version = %id, parent = %parent, "Appended version");

            change_set.versions.push(id.clone());
            parent = id;
        }

        *current = CurrentVersion::new(parent);
        self.change_sets.push(change_set);
        Ok(&self.change_sets[index])
    }

    /// Append a single operation under an explicit version id.
    pub fn add_version(
        &mut self,
        current: &mut CurrentVersion,
        version_id: impl Into<String>,
        mut change_set: ChangeSet,
        operation: SchemaOperation,
    ) -> Result<&Version> {
        let version_id = version_id.into();
        check_state(!self.versions.contains_key(&version_id), || {
            format!("Version: {} already exists", version_id)
        })?;
        let append_to = self.require(current.id())?;
        check_state(append_to.child.is_none(), || {
            format!(
                "Version: {} already has a child; history cannot branch",
                current.id()
            )
        })?;

        let index = self.change_sets.len();
        let version = Version::new(version_id.clone(), Some(operation), Some(index))?;
        self.versions.insert(version_id.clone(), version);
        self.link(current.id(), &version_id)?;

        change_set.versions.push(version_id.clone());
        self.change_sets.push(change_set);
        *current = CurrentVersion::new(version_id.clone());
        Ok(&self.versions[&version_id])
    }

    /// Link `child` under `parent`. Either side being linked already is an error.
    fn link(&mut self, parent: &str, child: &str) -> Result<()> {
        let child_version = self.require(child)?;
        check_state(child_version.parent.is_none(), || {
            format!("Version: {} already has a parent", child)
        })?;
        let parent_version = self.require(parent)?;
        check_state(parent_version.child.is_none(), || {
            format!("Version: {} already has a child", parent)
        })?;

        if let Some(version) = self.versions.get_mut(parent) {
            version.child = Some(child.to_string());
        }
        if let Some(version) = self.versions.get_mut(child) {
            version.parent = Some(parent.to_string());
        }
        Ok(())
    }

    /// Find a version by breadth-first search from the root.
    pub fn get_version(&self, id: &str) -> Result<&Version> {
        require_non_empty(id, "versionId")?;

        let mut to_visit = VecDeque::from([self.root.as_str()]);
        let mut visited = BTreeSet::new();
        while let Some(current) = to_visit.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(version) = self.versions.get(current) else {
                continue;
            };
            if version.id == id {
                return Ok(version);
            }
            if let Some(child) = version.child() {
                to_visit.push_back(child);
            }
        }

        Err(Error::invalid_argument(format!(
            "No version found with id: '{}'.",
            id
        )))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.versions.contains_key(id)
    }

    /// Direct lookup in the arena.
    pub(crate) fn require(&self, id: &str) -> Result<&Version> {
        self.versions.get(id).ok_or_else(|| {
            Error::invalid_argument(format!("No version found with id: '{}'.", id))
        })
    }

    pub(crate) fn lookup(&self, id: &str) -> Option<&Version> {
        self.versions.get(id)
    }

    /// Distance from the root, or `None` for an unknown version.
    pub fn depth(&self, id: &str) -> Option<usize> {
        let mut depth = 0;
        let mut pointer = self.versions.get(id)?;
        while let Some(parent) = pointer.parent() {
            pointer = self.versions.get(parent)?;
            depth += 1;
        }
        Some(depth)
    }

    /// Relative position of two versions on the chain.
    ///
    /// `Greater` when `a` descends from `b`, `Less` when `b` descends from
    /// `a`, `Equal` for the same version, `None` when they are unrelated.
    pub fn compare_position(&self, a: &str, b: &str) -> Option<Ordering> {
        if a == b {
            return self.versions.contains_key(a).then_some(Ordering::Equal);
        }
        let mut pointer = self.versions.get(a)?;
        while let Some(parent) = pointer.parent() {
            if parent == b {
                return Some(Ordering::Greater);
            }
            pointer = self.versions.get(parent)?;
        }
        let mut pointer = self.versions.get(a)?;
        while let Some(child) = pointer.child() {
            if child == b {
                return Some(Ordering::Less);
            }
            pointer = self.versions.get(child)?;
        }
        None
    }

    /// All versions from the root to the tail.
    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        let mut next = Some(self.root());
        std::iter::from_fn(move || {
            let current = next?;
            next = current.child().and_then(|id| self.versions.get(id));
            Some(current)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_table(name: &str) -> SchemaOperation {
        SchemaOperation::drop_table(name).unwrap()
    }

    #[test]
    fn test_add_change_set_chains_versions() {
        let mut changelog = Changelog::with_root("root").unwrap();
        let mut current = changelog.root_position();

        let change_set = ChangeSet::new("Michael", Some("cleanup".to_string())).unwrap();
        let created = changelog
            .add_change_set(&mut current, change_set, vec![drop_table("a"), drop_table("b")])
            .unwrap()
            .clone();

        assert_eq!(created.versions().len(), 2);
        assert_eq!(created.version(), Some(current.id()));

        let first = changelog.get_version(&created.versions()[0]).unwrap();
        let second = changelog.get_version(&created.versions()[1]).unwrap();
        assert_eq!(first.parent(), Some("root"));
        assert_eq!(first.child(), Some(second.id()));
        assert_eq!(second.parent(), Some(first.id()));
        assert_eq!(changelog.root().child(), Some(first.id()));
        assert_eq!(changelog.last_version().id(), second.id());
    }

    #[test]
    fn test_parent_child_consistency() {
        let mut changelog = Changelog::with_root("root").unwrap();
        let mut current = changelog.root_position();
        for i in 0..3 {
            let change_set = ChangeSet::new("Jeroen", None).unwrap();
            changelog
                .add_change_set(&mut current, change_set, vec![drop_table(&format!("t{}", i))])
                .unwrap();
        }

        for version in changelog.iter() {
            if let Some(parent) = version.parent() {
                let parent = changelog.get_version(parent).unwrap();
                assert_eq!(parent.child(), Some(version.id()));
            }
        }
        assert_eq!(changelog.iter().count(), 4);
    }

    #[test]
    fn test_cannot_branch() {
        let mut changelog = Changelog::with_root("root").unwrap();
        let mut current = changelog.root_position();
        changelog
            .add_change_set(
                &mut current,
                ChangeSet::new("a", None).unwrap(),
                vec![drop_table("x")],
            )
            .unwrap();

        let mut stale = changelog.root_position();
        let err = changelog
            .add_change_set(
                &mut stale,
                ChangeSet::new("b", None).unwrap(),
                vec![drop_table("y")],
            )
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState { .. }));
        assert_eq!(stale.id(), "root");
    }

    #[test]
    fn test_relinking_parent_fails() {
        let mut changelog = Changelog::with_root("root").unwrap();
        let mut current = changelog.root_position();
        changelog
            .add_version(
                &mut current,
                "v1",
                ChangeSet::new("a", None).unwrap(),
                drop_table("x"),
            )
            .unwrap();

        let err = changelog.link("root", "v1").unwrap_err();
        assert!(matches!(err, Error::IllegalState { .. }));
    }

    #[test]
    fn test_empty_ids_are_rejected() {
        assert!(Changelog::with_root("").unwrap_err().is_argument_error());
        assert!(ChangeSet::new("", None).is_err());

        let changelog = Changelog::with_root("root").unwrap();
        assert!(changelog.get_version("").is_err());
        assert!(changelog.get_version("missing").is_err());
    }

    #[test]
    fn test_empty_change_set_is_rejected() {
        let mut changelog = Changelog::with_root("root").unwrap();
        let mut current = changelog.root_position();
        let err = changelog
            .add_change_set(&mut current, ChangeSet::new("a", None).unwrap(), vec![])
            .unwrap_err();
        assert!(err.is_argument_error());
    }

    #[test]
    fn test_compare_position() {
        let mut changelog = Changelog::with_root("root").unwrap();
        let mut current = changelog.root_position();
        changelog
            .add_version(&mut current, "v1", ChangeSet::new("a", None).unwrap(), drop_table("x"))
            .unwrap();
        changelog
            .add_version(&mut current, "v2", ChangeSet::new("a", None).unwrap(), drop_table("y"))
            .unwrap();

        assert_eq!(changelog.compare_position("v2", "root"), Some(Ordering::Greater));
        assert_eq!(changelog.compare_position("root", "v2"), Some(Ordering::Less));
        assert_eq!(changelog.compare_position("v1", "v1"), Some(Ordering::Equal));
        assert_eq!(changelog.compare_position("v1", "nope"), None);
        assert_eq!(changelog.depth("v2"), Some(2));
    }

    #[test]
    fn test_change_sets_order_by_creation() {
        let earlier = ChangeSet::created_at("a", None, DateTime::from_timestamp(10, 0).unwrap()).unwrap();
        let later = ChangeSet::created_at("b", None, DateTime::from_timestamp(20, 0).unwrap()).unwrap();
        assert!(earlier < later);
    }
}
