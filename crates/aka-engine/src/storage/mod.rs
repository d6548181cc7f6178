//! Storage adapter abstraction.
//!
//! The [`Storage`] trait is the only component that touches durable state;
//! everything above it is policy. Backends hide their on-disk / on-wire
//! layout entirely — the engine speaks in hashes, commit ids, workspace ids
//! and repository paths.
//!
//! Consistency contract for implementations:
//!
//! - write-then-read on the same key is strongly consistent;
//! - [`Storage::update_branch`] is linearizable — two concurrent CAS
//!   attempts against the same head cannot both succeed;
//! - object and manifest blobs are immutable once written (scrubbing is a
//!   tombstone write followed by a delete, in that order).

pub mod memory;
pub mod opendal;

use async_trait::async_trait;

use aka_core::{
    BranchPointer, CommitId, CommitMetadata, ContentHash, CowReference, RepoPath, Result,
    Tombstone, WorkspaceId, WorkspaceMetadata,
};

/// Async content-addressed storage adapter.
///
/// All operations are per-key; coordinating writes across keys is the
/// engine's job. The branch CAS is the system's only synchronization
/// primitive.
#[async_trait]
pub trait Storage: Send + Sync {
    // ── Objects ──────────────────────────────────────────────────────

    /// Read an object's bytes. Fails `FileNotFound` if absent with no
    /// tombstone, `ObjectDeleted` if a tombstone exists.
    async fn read_object(&self, hash: &ContentHash) -> Result<Vec<u8>>;

    /// Hash and store `bytes`, returning the hash. Idempotent: equal bytes
    /// always map to the same hash and are stored once.
    async fn write_object(&self, bytes: &[u8]) -> Result<ContentHash>;

    /// Whether the object blob is present and not tombstoned.
    async fn object_exists(&self, hash: &ContentHash) -> Result<bool>;

    /// Byte size of a stored object, without reading its content.
    async fn object_size(&self, hash: &ContentHash) -> Result<i64>;

    async fn delete_object(&self, hash: &ContentHash) -> Result<()>;

    async fn read_tombstone(&self, hash: &ContentHash) -> Result<Option<Tombstone>>;

    async fn write_tombstone(&self, hash: &ContentHash, tombstone: &Tombstone) -> Result<()>;

    async fn list_tombstones(&self) -> Result<Vec<(ContentHash, Tombstone)>>;

    // ── Manifests ────────────────────────────────────────────────────

    /// Read a directory manifest blob by hash. Whether manifests share the
    /// object namespace is the backend's business.
    async fn read_manifest(&self, hash: &ContentHash) -> Result<Vec<u8>>;

    async fn write_manifest(&self, bytes: &[u8]) -> Result<ContentHash>;

    // ── Commits ──────────────────────────────────────────────────────

    /// Read the root manifest blob of a commit. Fails `CommitNotFound` on a
    /// miss.
    async fn read_root_manifest(&self, commit: &CommitId) -> Result<Vec<u8>>;

    async fn write_root_manifest(&self, commit: &CommitId, bytes: &[u8]) -> Result<()>;

    /// Fails `CommitNotFound` on a miss.
    async fn read_commit_metadata(&self, commit: &CommitId) -> Result<CommitMetadata>;

    async fn write_commit_metadata(&self, commit: &CommitId, meta: &CommitMetadata)
        -> Result<()>;

    // ── Branches ─────────────────────────────────────────────────────

    /// Fails `BranchNotFound` if the branch does not exist.
    async fn read_branch(&self, name: &str) -> Result<BranchPointer>;

    /// Compare-and-swap the branch head. `expected = None` requires that the
    /// branch not yet exist. On mismatch, fails `BranchConflict`.
    async fn update_branch(
        &self,
        name: &str,
        expected: Option<&CommitId>,
        new_commit: &CommitId,
    ) -> Result<()>;

    async fn list_branches(&self) -> Result<Vec<String>>;

    /// Advance the persisted commit counter and return the new value.
    /// Backed by the same CAS machinery as branches, so concurrently
    /// publishing sessions never receive the same number.
    async fn next_commit_number(&self) -> Result<u64>;

    // ── Workspaces ───────────────────────────────────────────────────

    /// Fails `WorkspaceNotFound` on a miss.
    async fn read_workspace_metadata(&self, ws: &WorkspaceId) -> Result<WorkspaceMetadata>;

    async fn write_workspace_metadata(
        &self,
        ws: &WorkspaceId,
        meta: &WorkspaceMetadata,
    ) -> Result<()>;

    async fn workspace_exists(&self, ws: &WorkspaceId) -> Result<bool>;

    /// Remove every artifact of the workspace. Best-effort and idempotent.
    async fn delete_workspace(&self, ws: &WorkspaceId) -> Result<()>;

    // ── Workspace file overlay ───────────────────────────────────────

    async fn read_workspace_file(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
    ) -> Result<Option<Vec<u8>>>;

    async fn write_workspace_file(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
        bytes: &[u8],
    ) -> Result<()>;

    async fn delete_workspace_file(&self, ws: &WorkspaceId, path: &RepoPath) -> Result<()>;

    async fn read_cow_reference(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
    ) -> Result<Option<CowReference>>;

    async fn write_cow_reference(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
        reference: &CowReference,
    ) -> Result<()>;

    async fn delete_cow_reference(&self, ws: &WorkspaceId, path: &RepoPath) -> Result<()>;

    /// Read the shadow manifest of a directory, if the workspace has one.
    async fn read_workspace_manifest(
        &self,
        ws: &WorkspaceId,
        dir: &RepoPath,
    ) -> Result<Option<Vec<u8>>>;

    async fn write_workspace_manifest(
        &self,
        ws: &WorkspaceId,
        dir: &RepoPath,
        bytes: &[u8],
    ) -> Result<()>;
}
