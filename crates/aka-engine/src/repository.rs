//! The repository: session factory, workspace lifecycle, publish, history,
//! branch reset, and content scrubbing.
//!
//! A `Repository` is a thin handle over a shared storage adapter. It holds
//! no locks and no in-memory indices; the only synchronization in the whole
//! engine is the branch compare-and-swap inside [`publish_workspace`] and
//! [`reset_branch`].
//!
//! [`publish_workspace`]: Repository::publish_workspace
//! [`reset_branch`]: Repository::reset_branch

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;

use aka_core::{
    manifest, ChangesetRef, CommitId, CommitMetadata, ContentHash, Error, ManifestEntry, RepoPath,
    Result, Tombstone, WorkspaceId, WorkspaceMetadata,
};

use crate::session::Session;
use crate::storage::Storage;

/// The branch seeded by [`Repository::init`].
pub const DEFAULT_BRANCH: &str = "main";

pub struct Repository {
    storage: Arc<dyn Storage>,
}

/// Result of folding one directory during publish.
struct FoldedDir {
    hash: ContentHash,
    bytes: Vec<u8>,
    entry_count: usize,
}

impl Repository {
    /// Wrap an already-initialized store.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Open the repository, seeding the initial commit `@0` (empty root
    /// manifest) and the `main` branch if the store is fresh.
    pub async fn init(storage: Arc<dyn Storage>) -> Result<Self> {
        let repo = Self::new(storage);
        match repo.storage.read_branch(DEFAULT_BRANCH).await {
            Ok(_) => Ok(repo),
            Err(Error::BranchNotFound(_)) => {
                let initial = CommitId::initial();
                repo.storage.write_root_manifest(&initial, &[]).await?;
                repo.storage
                    .write_commit_metadata(
                        &initial,
                        &CommitMetadata {
                            message: "initialize repository".to_string(),
                            author: "akashica".to_string(),
                            timestamp: Utc::now(),
                            parent: None,
                        },
                    )
                    .await?;
                match repo
                    .storage
                    .update_branch(DEFAULT_BRANCH, None, &initial)
                    .await
                {
                    // Lost a race against another initializer; its seed wins.
                    Ok(()) | Err(Error::BranchConflict(_)) => {}
                    Err(e) => return Err(e),
                }
                tracing::info!("initialized empty repository");
                Ok(repo)
            }
            Err(e) => Err(e),
        }
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Open a session on a commit (read-only) or workspace (read-write).
    /// The changeset must exist.
    pub async fn session(&self, changeset: ChangesetRef) -> Result<Session> {
        match &changeset {
            ChangesetRef::Commit(commit) => {
                self.storage.read_commit_metadata(commit).await?;
            }
            ChangesetRef::Workspace(ws) => {
                if !self.storage.workspace_exists(ws).await? {
                    return Err(Error::WorkspaceNotFound(ws.clone()));
                }
            }
        }
        Ok(Session::new(self.storage.clone(), changeset, None))
    }

    /// Open a read-only session on a branch's current head.
    pub async fn session_on_branch(&self, branch: &str) -> Result<Session> {
        let head = self.storage.read_branch(branch).await?.head;
        Ok(Session::new(
            self.storage.clone(),
            ChangesetRef::Commit(head),
            Some(branch.to_string()),
        ))
    }

    // ── Workspace lifecycle ──────────────────────────────────────────

    /// Create a workspace on `base`. The overlay starts empty, so the
    /// workspace's effective view equals the base commit until written to.
    pub async fn create_workspace(&self, base: &CommitId, creator: &str) -> Result<WorkspaceId> {
        // The base must exist at creation time.
        self.storage.read_commit_metadata(base).await?;
        let ws = WorkspaceId::random(base.clone());
        self.storage
            .write_workspace_metadata(
                &ws,
                &WorkspaceMetadata {
                    base: base.clone(),
                    created: Utc::now(),
                    creator: creator.to_string(),
                },
            )
            .await?;
        tracing::debug!(workspace = %ws, %base, "created workspace");
        Ok(ws)
    }

    /// Create a workspace on a branch's current head.
    pub async fn create_workspace_on_branch(
        &self,
        branch: &str,
        creator: &str,
    ) -> Result<WorkspaceId> {
        let head = self.storage.read_branch(branch).await?.head;
        self.create_workspace(&head, creator).await
    }

    /// Best-effort removal of every workspace artifact. Idempotent.
    pub async fn delete_workspace(&self, ws: &WorkspaceId) -> Result<()> {
        self.storage.delete_workspace(ws).await?;
        tracing::debug!(workspace = %ws, "deleted workspace");
        Ok(())
    }

    // ── Publish ──────────────────────────────────────────────────────

    /// Fold a workspace into a new immutable commit and advance `branch` to
    /// it atomically.
    ///
    /// The fold reuses every unchanged hash: untouched subtrees are carried
    /// by their base manifest entry without any I/O, unchanged files in
    /// touched directories copy the base entry, COW references fold to their
    /// recorded hash, and only workspace-written blobs hit the object store
    /// (where identical content deduplicates).
    ///
    /// The new commit's parent is the branch head observed at the start of
    /// the publish; on a CAS mismatch the publish fails with
    /// `BranchConflict` and the workspace is left intact so the caller can
    /// publish again against the new head.
    pub async fn publish_workspace(
        &self,
        ws: &WorkspaceId,
        branch: &str,
        message: &str,
        author: &str,
    ) -> Result<CommitId> {
        let meta = self.storage.read_workspace_metadata(ws).await?;
        let expected_head = match self.storage.read_branch(branch).await {
            Ok(pointer) => Some(pointer.head),
            Err(Error::BranchNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let base_root =
            manifest::decode(&self.storage.read_root_manifest(&meta.base).await?)?;
        let folded = self
            .fold_directory(ws, RepoPath::root(), Some(base_root))
            .await?;

        let number = self.storage.next_commit_number().await?;
        let commit = CommitId::new(format!("@{number}"));
        self.storage
            .write_root_manifest(&commit, &folded.bytes)
            .await?;
        self.storage
            .write_commit_metadata(
                &commit,
                &CommitMetadata {
                    message: message.to_string(),
                    author: author.to_string(),
                    timestamp: Utc::now(),
                    parent: expected_head.clone(),
                },
            )
            .await?;

        match self
            .storage
            .update_branch(branch, expected_head.as_ref(), &commit)
            .await
        {
            Ok(()) => {}
            Err(e @ Error::BranchConflict(_)) => {
                tracing::warn!(workspace = %ws, branch, "publish lost branch CAS");
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        self.storage.delete_workspace(ws).await?;
        tracing::info!(%commit, branch, workspace = %ws, "published workspace");
        Ok(commit)
    }

    /// Recursively fold one directory of the workspace into new manifests.
    ///
    /// `base_entries` is only consulted when the directory has no shadow
    /// manifest, which can only happen at the root: shadow chains are
    /// materialized up to the root on every workspace write, so recursion
    /// descends exclusively into shadowed children.
    fn fold_directory<'a>(
        &'a self,
        ws: &'a WorkspaceId,
        dir: RepoPath,
        base_entries: Option<Vec<ManifestEntry>>,
    ) -> Pin<Box<dyn Future<Output = Result<FoldedDir>> + Send + 'a>> {
        Box::pin(async move {
            let source = match self.storage.read_workspace_manifest(ws, &dir).await? {
                Some(bytes) => manifest::decode(&bytes)?,
                None => base_entries.unwrap_or_default(),
            };

            let mut folded: Vec<ManifestEntry> = Vec::with_capacity(source.len());
            for entry in source {
                let path = dir.join(&entry.name);
                if entry.is_directory {
                    let touched = self
                        .storage
                        .read_workspace_manifest(ws, &path)
                        .await?
                        .is_some();
                    if !touched {
                        // Untouched subtree: verbatim hash reuse.
                        folded.push(entry);
                        continue;
                    }
                    let child = self.fold_directory(ws, path, None).await?;
                    if child.entry_count == 0 {
                        // Directories with no remaining children fold away.
                        continue;
                    }
                    folded.push(ManifestEntry::directory(
                        child.hash,
                        child.bytes.len() as i64,
                        entry.name,
                    ));
                } else if let Some(bytes) =
                    self.storage.read_workspace_file(ws, &path).await?
                {
                    let hash = self.storage.write_object(&bytes).await?;
                    folded.push(ManifestEntry::file(hash, bytes.len() as i64, entry.name));
                } else if let Some(reference) =
                    self.storage.read_cow_reference(ws, &path).await?
                {
                    // The referenced object already exists; no I/O needed.
                    folded.push(ManifestEntry::file(
                        reference.hash,
                        reference.size,
                        entry.name,
                    ));
                } else {
                    // Unchanged file in a touched directory: carry the base
                    // entry.
                    folded.push(entry);
                }
            }

            let bytes = manifest::encode(&folded);
            let hash = self.storage.write_manifest(&bytes).await?;
            Ok(FoldedDir {
                hash,
                bytes,
                entry_count: folded.len(),
            })
        })
    }

    // ── Branches & history ───────────────────────────────────────────

    pub async fn branches(&self) -> Result<Vec<String>> {
        self.storage.list_branches().await
    }

    pub async fn current_commit(&self, branch: &str) -> Result<CommitId> {
        Ok(self.storage.read_branch(branch).await?.head)
    }

    pub async fn commit_metadata(&self, commit: &CommitId) -> Result<CommitMetadata> {
        self.storage.read_commit_metadata(commit).await
    }

    /// Walk from the branch head along parent links, newest first, up to
    /// `limit` commits. Stops at the initial commit.
    pub async fn commit_history(
        &self,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<(CommitId, CommitMetadata)>> {
        let mut history = Vec::new();
        let mut cursor = Some(self.storage.read_branch(branch).await?.head);
        while let Some(commit) = cursor {
            if history.len() == limit {
                break;
            }
            let meta = self.storage.read_commit_metadata(&commit).await?;
            cursor = meta.parent.clone();
            history.push((commit, meta));
        }
        Ok(history)
    }

    /// Whether `a` equals `b` or is reachable from `b` via parent links.
    pub async fn is_ancestor(&self, a: &CommitId, b: &CommitId) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        let mut cursor = self.storage.read_commit_metadata(b).await?.parent;
        while let Some(commit) = cursor {
            if &commit == a {
                return Ok(true);
            }
            cursor = self.storage.read_commit_metadata(&commit).await?.parent;
        }
        Ok(false)
    }

    /// Commits on the parent chain from `to` back to, but not including,
    /// `from`, newest first. Fails `CommitNotFound` when `from` is not an
    /// ancestor of `to`.
    pub async fn commits_between(
        &self,
        from: &CommitId,
        to: &CommitId,
    ) -> Result<Vec<(CommitId, CommitMetadata)>> {
        let mut commits = Vec::new();
        let mut cursor = Some(to.clone());
        while let Some(commit) = cursor {
            if &commit == from {
                return Ok(commits);
            }
            let meta = self.storage.read_commit_metadata(&commit).await?;
            cursor = meta.parent.clone();
            commits.push((commit, meta));
        }
        Err(Error::CommitNotFound(from.clone()))
    }

    /// Move a branch head to `target`. Without `force`, the target must be
    /// an ancestor of the current head (a rewind); anything else fails
    /// `NonAncestorReset`.
    pub async fn reset_branch(&self, name: &str, target: &CommitId, force: bool) -> Result<()> {
        let head = self.storage.read_branch(name).await?.head;
        if head == *target {
            return Ok(());
        }
        if !force && !self.is_ancestor(target, &head).await? {
            return Err(Error::NonAncestorReset {
                branch: name.to_string(),
                head,
                target: target.clone(),
            });
        }
        self.storage.read_commit_metadata(target).await?;
        self.storage
            .update_branch(name, Some(&head), target)
            .await?;
        tracing::info!(branch = name, %target, "reset branch");
        Ok(())
    }

    // ── Scrubbing ────────────────────────────────────────────────────

    /// Expunge an object's bytes, leaving a tombstone behind. The tombstone
    /// is written before the object is deleted, so a crash between the two
    /// leaves a readable tombstone rather than a bare missing object.
    /// Commit structure is untouched: manifests keep listing the hash.
    pub async fn scrub_content(
        &self,
        hash: &ContentHash,
        reason: &str,
        deleted_by: &str,
    ) -> Result<Tombstone> {
        if !self.storage.object_exists(hash).await? {
            return Err(Error::FileNotFound(hash.to_string()));
        }
        let size = self.storage.object_size(hash).await?;
        let tombstone = Tombstone {
            deleted_hash: hash.clone(),
            reason: reason.to_string(),
            deleted_by: deleted_by.to_string(),
            deleted_at: Utc::now(),
            original_size: size,
        };
        self.storage.write_tombstone(hash, &tombstone).await?;
        self.storage.delete_object(hash).await?;
        tracing::info!(%hash, deleted_by, reason, "scrubbed object");
        Ok(tombstone)
    }

    /// Scrub the object a commit references at `path`. Resolves the hash by
    /// walking manifests only — the object bytes are never read, so this
    /// works even on very large blobs.
    pub async fn scrub_path(
        &self,
        path: &RepoPath,
        commit: &CommitId,
        reason: &str,
        deleted_by: &str,
    ) -> Result<Tombstone> {
        let mut entries = manifest::decode(&self.storage.read_root_manifest(commit).await?)?;
        let components = path.components();
        if components.is_empty() {
            return Err(Error::FileNotFound(path.to_string()));
        }
        for (i, name) in components.iter().enumerate() {
            let Some(entry) = entries.iter().find(|e| &e.name == name) else {
                return Err(Error::FileNotFound(path.to_string()));
            };
            if i + 1 == components.len() {
                if entry.is_directory {
                    return Err(Error::FileNotFound(path.to_string()));
                }
                let hash = entry.hash.clone();
                return self.scrub_content(&hash, reason, deleted_by).await;
            }
            if !entry.is_directory {
                return Err(Error::FileNotFound(path.to_string()));
            }
            entries = manifest::decode(&self.storage.read_manifest(&entry.hash).await?)?;
        }
        unreachable!("loop returns on the final component")
    }

    pub async fn list_scrubbed_content(&self) -> Result<Vec<(ContentHash, Tombstone)>> {
        self.storage.list_tombstones().await
    }
}
