use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ── Content hash ─────────────────────────────────────────────────────

/// Lowercase hex SHA-256 of content bytes.
///
/// Identical byte sequences always yield the same hash, which is what makes
/// deduplication work across paths and commits. Equality and hashing are
/// string-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the given bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Accept a hex string verbatim. The caller vouches for well-formedness;
    /// use [`ContentHash::is_well_formed`] to validate untrusted input.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Whether `hex` is a plausible content hash: 64 lowercase hex digits.
    pub fn is_well_formed(hex: &str) -> bool {
        hex.len() == 64
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Commit id ────────────────────────────────────────────────────────

/// Opaque commit identifier, conventionally `@<token>`.
///
/// Commits are identified by these short strings rather than by content hash
/// because a commit is metadata plus a pointer, not part of the
/// content-addressed namespace. The initial commit of a repository is `@0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The conventional id of a repository's initial commit.
    pub fn initial() -> Self {
        Self("@0".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Workspace id ─────────────────────────────────────────────────────

/// Identifier of a mutable workspace: `@<base>$<suffix>`.
///
/// The base commit pins what the workspace overlays; the suffix is a short
/// random token so that concurrent workspaces on the same base never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceId {
    pub base: CommitId,
    pub suffix: String,
}

impl WorkspaceId {
    pub fn new(base: CommitId, suffix: impl Into<String>) -> Self {
        Self {
            base,
            suffix: suffix.into(),
        }
    }

    /// A fresh workspace id on `base` with a random 8-char suffix.
    pub fn random(base: CommitId) -> Self {
        let mut suffix = Uuid::new_v4().simple().to_string();
        suffix.truncate(8);
        Self { base, suffix }
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}", self.base, self.suffix)
    }
}

impl FromStr for WorkspaceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, suffix) = s
            .split_once('$')
            .ok_or_else(|| format!("workspace id '{s}' is missing the '$' separator"))?;
        if base.is_empty() || suffix.is_empty() {
            return Err(format!("workspace id '{s}' has an empty base or suffix"));
        }
        Ok(Self {
            base: CommitId::new(base),
            suffix: suffix.to_string(),
        })
    }
}

// ── Changeset reference ──────────────────────────────────────────────

/// What a session can be bound to: an immutable commit (read-only) or a
/// mutable workspace (read-write).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesetRef {
    Commit(CommitId),
    Workspace(WorkspaceId),
}

impl fmt::Display for ChangesetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit(c) => c.fmt(f),
            Self::Workspace(w) => w.fmt(f),
        }
    }
}

// ── Repository path ──────────────────────────────────────────────────

/// A repository path: an ordered sequence of non-empty name components.
///
/// Construction splits on `/` and drops empty segments, so leading, trailing
/// and duplicate slashes all normalize away. The root is the empty sequence.
/// Paths are case-sensitive and components never contain `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoPath(Vec<String>);

impl RepoPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(path: &str) -> Self {
        Self(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Append `name` (itself slash-splittable) to this path.
    pub fn join(&self, name: &str) -> Self {
        let mut components = self.0.clone();
        components.extend(name.split('/').filter(|s| !s.is_empty()).map(String::from));
        Self(components)
    }

    /// The containing directory, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The final component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Split into `(parent, final component)`, or `None` for the root.
    pub fn split_last(&self) -> Option<(Self, &str)> {
        let name = self.0.last()?;
        Some((Self(self.0[..self.0.len() - 1].to_vec()), name.as_str()))
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl From<&str> for RepoPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RepoPath {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<&RepoPath> for RepoPath {
    fn from(p: &RepoPath) -> Self {
        p.clone()
    }
}

impl Serialize for RepoPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RepoPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(&s))
    }
}

// ── Manifest entry ───────────────────────────────────────────────────

/// One child of a directory: a file blob or a nested directory manifest.
///
/// For files, `size` is the byte size of the content; for directories it is
/// the byte size of the child manifest blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub hash: ContentHash,
    pub size: i64,
    pub name: String,
    pub is_directory: bool,
}

impl ManifestEntry {
    pub fn file(hash: ContentHash, size: i64, name: impl Into<String>) -> Self {
        Self {
            hash,
            size,
            name: name.into(),
            is_directory: false,
        }
    }

    pub fn directory(hash: ContentHash, size: i64, name: impl Into<String>) -> Self {
        Self {
            hash,
            size,
            name: name.into(),
            is_directory: true,
        }
    }
}

// ── Commit metadata ──────────────────────────────────────────────────

/// Metadata stored alongside a commit's root manifest. Every commit except
/// the initial one has exactly one parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub parent: Option<CommitId>,
}

// ── Branch pointer ───────────────────────────────────────────────────

/// A branch's current head. Updates are compare-and-swap on `head`; the head
/// is always a published commit id, never a workspace id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPointer {
    pub head: CommitId,
}

// ── Workspace metadata ───────────────────────────────────────────────

/// Immutable record written at workspace creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    pub base: CommitId,
    pub created: DateTime<Utc>,
    pub creator: String,
}

// ── COW reference ────────────────────────────────────────────────────

/// A copy-on-write marker: this path's content is an unchanged blob that
/// merely moved from `base_path` in the base commit. Lets rename/move avoid
/// copying bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CowReference {
    pub base_path: RepoPath,
    pub hash: ContentHash,
    pub size: i64,
}

// ── Tombstone ────────────────────────────────────────────────────────

/// Durable marker left behind when an object is scrubbed. Commits keep
/// referencing the hash; reads of it surface the tombstone instead of the
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub deleted_hash: ContentHash,
    pub reason: String,
    pub deleted_by: String,
    pub deleted_at: DateTime<Utc>,
    pub original_size: i64,
}

// ── File change ──────────────────────────────────────────────────────

/// One entry of a status/diff result. Renames via COW are reported as a
/// `Deleted` at the source and an `Added` at the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Added(RepoPath),
    Modified(RepoPath),
    Deleted(RepoPath),
}

impl FileChange {
    pub fn path(&self) -> &RepoPath {
        match self {
            Self::Added(p) | Self::Modified(p) | Self::Deleted(p) => p,
        }
    }
}
