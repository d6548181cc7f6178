//! Sessions — the path-oriented read/write surface of the engine.
//!
//! A session binds a caller to a changeset: a commit (read-only) or a
//! workspace (read-write). Sessions are independent; each one's only state
//! is its changeset reference, so any number of them may run concurrently.
//!
//! Reads resolve through the workspace overlay first and fall through to the
//! base commit. The key rule is the shadow manifest: once a workspace has a
//! manifest for a directory, that manifest is the sole authority for the
//! directory's children — base entries absent from it are deleted.

use std::collections::BTreeMap;
use std::sync::Arc;

use aka_core::{
    manifest, ChangesetRef, CommitId, ContentHash, CowReference, Error, FileChange, ManifestEntry,
    RepoPath, Result, WorkspaceId,
};

use crate::storage::Storage;

/// Result of [`Session::status`]: file paths grouped by the kind of change
/// relative to the workspace's base commit. Renames via COW appear as an
/// addition at the destination and a deletion at the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceStatus {
    pub added: Vec<RepoPath>,
    pub modified: Vec<RepoPath>,
    pub deleted: Vec<RepoPath>,
}

impl WorkspaceStatus {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// A handle bound to one changeset.
pub struct Session {
    storage: Arc<dyn Storage>,
    changeset: ChangesetRef,
    branch_hint: Option<String>,
}

impl Session {
    pub(crate) fn new(
        storage: Arc<dyn Storage>,
        changeset: ChangesetRef,
        branch_hint: Option<String>,
    ) -> Self {
        Self {
            storage,
            changeset,
            branch_hint,
        }
    }

    pub fn changeset(&self) -> &ChangesetRef {
        &self.changeset
    }

    /// The branch this session was opened from, if any.
    pub fn branch(&self) -> Option<&str> {
        self.branch_hint.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.changeset, ChangesetRef::Commit(_))
    }

    fn workspace(&self) -> Option<&WorkspaceId> {
        match &self.changeset {
            ChangesetRef::Workspace(ws) => Some(ws),
            ChangesetRef::Commit(_) => None,
        }
    }

    fn require_workspace(&self) -> Result<WorkspaceId> {
        self.workspace().cloned().ok_or(Error::SessionReadOnly)
    }

    /// The commit every fall-through read lands on: the bound commit, or a
    /// workspace's base commit.
    fn base_commit(&self) -> &CommitId {
        match &self.changeset {
            ChangesetRef::Commit(c) => c,
            ChangesetRef::Workspace(ws) => &ws.base,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Read a file's bytes at `path`. Fails `FileNotFound` if the path does
    /// not resolve in the effective view, `ObjectDeleted` if the resolved
    /// object was scrubbed.
    pub async fn read_file(&self, path: impl Into<RepoPath>) -> Result<Vec<u8>> {
        let path = path.into();
        let entry = self
            .resolve_entry(&path)
            .await?
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
        if entry.is_directory {
            return Err(Error::FileNotFound(path.to_string()));
        }

        if let Some(ws) = self.workspace() {
            if let Some(bytes) = self.storage.read_workspace_file(ws, &path).await? {
                return Ok(bytes);
            }
            if let Some(reference) = self.storage.read_cow_reference(ws, &path).await? {
                return self.storage.read_object(&reference.hash).await;
            }
        }
        self.storage.read_object(&entry.hash).await
    }

    /// List the live entries of a directory, sorted by name. The root path
    /// yields the root listing. Fails `FileNotFound` if the path is a file
    /// or does not resolve.
    pub async fn list_directory(&self, path: impl Into<RepoPath>) -> Result<Vec<ManifestEntry>> {
        let path = path.into();
        let mut entries = if path.is_root() {
            self.effective_root_entries().await?
        } else {
            let entry = self
                .resolve_entry(&path)
                .await?
                .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
            if !entry.is_directory {
                return Err(Error::FileNotFound(path.to_string()));
            }
            self.directory_entries(&path, &entry).await?
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Whether `path` resolves to anything in the effective view. Never
    /// fails on a miss.
    pub async fn file_exists(&self, path: impl Into<RepoPath>) -> Result<bool> {
        let path = path.into();
        if path.is_root() {
            return Ok(true);
        }
        Ok(self.resolve_entry(&path).await?.is_some())
    }

    // ── Writes (workspace sessions only) ─────────────────────────────

    /// Store new content at `path`, creating intermediate directories as
    /// needed. The content is hashed eagerly so the shadow manifests stay
    /// accurate for status and diff without re-reading the blob.
    pub async fn write_file(&self, path: impl Into<RepoPath>, bytes: &[u8]) -> Result<()> {
        let path = path.into();
        let ws = self.require_workspace()?;
        let (dir, name) = path
            .split_last()
            .map(|(d, n)| (d, n.to_string()))
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;

        self.storage.write_workspace_file(&ws, &path, bytes).await?;
        self.storage.delete_cow_reference(&ws, &path).await?;

        let entry = ManifestEntry::file(ContentHash::of(bytes), bytes.len() as i64, name);
        self.rewrite_directory(&ws, &dir, |entries| upsert(entries, entry))
            .await
    }

    /// Remove the file at `path` from the effective view. Fails
    /// `FileNotFound` if the path is absent or is a directory.
    pub async fn delete_file(&self, path: impl Into<RepoPath>) -> Result<()> {
        let path = path.into();
        let ws = self.require_workspace()?;
        let entry = self
            .resolve_entry(&path)
            .await?
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
        if entry.is_directory {
            return Err(Error::FileNotFound(path.to_string()));
        }
        let (dir, name) = path
            .split_last()
            .map(|(d, n)| (d, n.to_string()))
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;

        self.rewrite_directory(&ws, &dir, |entries| entries.retain(|e| e.name != name))
            .await?;
        self.storage.delete_workspace_file(&ws, &path).await?;
        self.storage.delete_cow_reference(&ws, &path).await?;
        Ok(())
    }

    /// Move a file. Unchanged base content moves as a COW reference —
    /// no bytes are copied; workspace-written content moves its blob.
    pub async fn move_file(
        &self,
        from: impl Into<RepoPath>,
        to: impl Into<RepoPath>,
    ) -> Result<()> {
        let from = from.into();
        let to = to.into();
        let ws = self.require_workspace()?;
        if from == to {
            return Ok(());
        }

        let entry = self
            .resolve_entry(&from)
            .await?
            .ok_or_else(|| Error::FileNotFound(from.to_string()))?;
        if entry.is_directory {
            return Err(Error::FileNotFound(from.to_string()));
        }
        let (to_dir, to_name) = to
            .split_last()
            .map(|(d, n)| (d, n.to_string()))
            .ok_or_else(|| Error::FileNotFound(to.to_string()))?;
        let (from_dir, from_name) = from
            .split_last()
            .map(|(d, n)| (d, n.to_string()))
            .ok_or_else(|| Error::FileNotFound(from.to_string()))?;

        // Carry the content to the destination.
        if let Some(bytes) = self.storage.read_workspace_file(&ws, &from).await? {
            self.storage.write_workspace_file(&ws, &to, &bytes).await?;
            self.storage.delete_cow_reference(&ws, &to).await?;
        } else if let Some(reference) = self.storage.read_cow_reference(&ws, &from).await? {
            // A chained move keeps pointing at the original base path.
            self.storage.write_cow_reference(&ws, &to, &reference).await?;
            self.storage.delete_workspace_file(&ws, &to).await?;
        } else {
            let reference = CowReference {
                base_path: from.clone(),
                hash: entry.hash.clone(),
                size: entry.size,
            };
            self.storage.write_cow_reference(&ws, &to, &reference).await?;
            self.storage.delete_workspace_file(&ws, &to).await?;
        }

        let moved = ManifestEntry::file(entry.hash.clone(), entry.size, to_name);
        self.rewrite_directory(&ws, &to_dir, |entries| upsert(entries, moved))
            .await?;
        self.rewrite_directory(&ws, &from_dir, |entries| {
            entries.retain(|e| e.name != from_name);
        })
        .await?;

        self.storage.delete_workspace_file(&ws, &from).await?;
        self.storage.delete_cow_reference(&ws, &from).await?;
        Ok(())
    }

    // ── Status & diff ────────────────────────────────────────────────

    /// Compare the workspace's effective tree against its base commit.
    /// Only defined on workspace sessions.
    pub async fn status(&self) -> Result<WorkspaceStatus> {
        let ws = self.require_workspace()?;
        let changes = self.diff(&ws.base).await?;
        let mut status = WorkspaceStatus::default();
        for change in changes {
            match change {
                FileChange::Added(p) => status.added.push(p),
                FileChange::Modified(p) => status.modified.push(p),
                FileChange::Deleted(p) => status.deleted.push(p),
            }
        }
        Ok(status)
    }

    /// Compare this session's tree against another commit's tree, returning
    /// the changes that turn `against` into this session's view. A path that
    /// flips between file and directory emits a `Deleted` for the old side
    /// and an `Added` for the new. Self-diff is empty.
    pub async fn diff(&self, against: &CommitId) -> Result<Vec<FileChange>> {
        let old_root = manifest::decode(&self.storage.read_root_manifest(against).await?)?;
        let new_root = self.effective_root_entries().await?;

        let mut changes = Vec::new();
        let mut stack: Vec<(RepoPath, Option<Vec<ManifestEntry>>, Option<Vec<ManifestEntry>>)> =
            vec![(RepoPath::root(), Some(new_root), Some(old_root))];

        while let Some((dir, new_entries, old_entries)) = stack.pop() {
            let new_map = by_name(new_entries.unwrap_or_default());
            let old_map = by_name(old_entries.unwrap_or_default());

            let mut names: Vec<&String> = new_map.keys().chain(old_map.keys()).collect();
            names.sort();
            names.dedup();
            let names: Vec<String> = names.into_iter().cloned().collect();

            for name in names {
                let path = dir.join(&name);
                match (new_map.get(&name), old_map.get(&name)) {
                    (Some(n), Some(o)) => match (n.is_directory, o.is_directory) {
                        (true, true) => {
                            let new_child = self.load_new_side(&path, n).await?;
                            let old_child = self.load_old_side(o).await?;
                            stack.push((path, Some(new_child), Some(old_child)));
                        }
                        (false, false) => {
                            if n.hash != o.hash || n.size != o.size {
                                changes.push(FileChange::Modified(path));
                            }
                        }
                        (true, false) => {
                            changes.push(FileChange::Deleted(path.clone()));
                            let new_child = self.load_new_side(&path, n).await?;
                            stack.push((path, Some(new_child), None));
                        }
                        (false, true) => {
                            changes.push(FileChange::Added(path.clone()));
                            let old_child = self.load_old_side(o).await?;
                            stack.push((path, None, Some(old_child)));
                        }
                    },
                    (Some(n), None) => {
                        if n.is_directory {
                            let new_child = self.load_new_side(&path, n).await?;
                            stack.push((path, Some(new_child), None));
                        } else {
                            changes.push(FileChange::Added(path));
                        }
                    }
                    (None, Some(o)) => {
                        if o.is_directory {
                            let old_child = self.load_old_side(o).await?;
                            stack.push((path, None, Some(old_child)));
                        } else {
                            changes.push(FileChange::Deleted(path));
                        }
                    }
                    (None, None) => unreachable!("name came from one of the maps"),
                }
            }
        }

        changes.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(changes)
    }

    // ── Resolution internals ─────────────────────────────────────────

    /// Resolve `path` to its manifest entry in the effective view, walking
    /// shadow manifests where they exist and base manifests otherwise.
    /// `None` means the path does not resolve; the root is not an entry.
    async fn resolve_entry(&self, path: &RepoPath) -> Result<Option<ManifestEntry>> {
        let components = path.components();
        if components.is_empty() {
            return Ok(None);
        }

        let mut dir = RepoPath::root();
        // The base commit's entries at `dir`, tracked alongside the walk so
        // a shadow-less directory can fall through to them.
        let mut base_entries: Option<Vec<ManifestEntry>> = Some(self.base_root_entries().await?);

        for (i, name) in components.iter().enumerate() {
            let effective = match self.shadow_entries(&dir).await? {
                Some(shadow) => Some(shadow),
                None => base_entries.clone(),
            };
            let Some(entries) = effective else {
                return Ok(None);
            };
            let Some(entry) = entries.into_iter().find(|e| &e.name == name) else {
                return Ok(None);
            };

            if i + 1 == components.len() {
                return Ok(Some(entry));
            }
            if !entry.is_directory {
                return Ok(None);
            }

            base_entries = match base_entries {
                Some(parent) => match parent.iter().find(|e| &e.name == name && e.is_directory) {
                    Some(base_entry) => Some(manifest::decode(
                        &self.storage.read_manifest(&base_entry.hash).await?,
                    )?),
                    None => None,
                },
                None => None,
            };
            dir = dir.join(name);
        }
        unreachable!("loop returns on the final component")
    }

    /// Decoded shadow manifest at `dir`, for workspace sessions that have
    /// one.
    async fn shadow_entries(&self, dir: &RepoPath) -> Result<Option<Vec<ManifestEntry>>> {
        let Some(ws) = self.workspace() else {
            return Ok(None);
        };
        match self.storage.read_workspace_manifest(ws, dir).await? {
            Some(bytes) => Ok(Some(manifest::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn base_root_entries(&self) -> Result<Vec<ManifestEntry>> {
        let bytes = self.storage.read_root_manifest(self.base_commit()).await?;
        manifest::decode(&bytes)
    }

    async fn effective_root_entries(&self) -> Result<Vec<ManifestEntry>> {
        if let Some(shadow) = self.shadow_entries(&RepoPath::root()).await? {
            return Ok(shadow);
        }
        self.base_root_entries().await
    }

    /// The children of a resolved directory entry: its shadow manifest when
    /// one exists, else the manifest blob its hash points at.
    async fn directory_entries(
        &self,
        path: &RepoPath,
        entry: &ManifestEntry,
    ) -> Result<Vec<ManifestEntry>> {
        if let Some(shadow) = self.shadow_entries(path).await? {
            return Ok(shadow);
        }
        manifest::decode(&self.storage.read_manifest(&entry.hash).await?)
    }

    async fn load_new_side(
        &self,
        path: &RepoPath,
        entry: &ManifestEntry,
    ) -> Result<Vec<ManifestEntry>> {
        self.directory_entries(path, entry).await
    }

    async fn load_old_side(&self, entry: &ManifestEntry) -> Result<Vec<ManifestEntry>> {
        manifest::decode(&self.storage.read_manifest(&entry.hash).await?)
    }

    // ── Shadow manifest maintenance ──────────────────────────────────

    /// Entries of `dir` as the next shadow write should start from: the
    /// existing shadow, or the base manifest materialized on first touch.
    async fn materialize_shadow(&self, ws: &WorkspaceId, dir: &RepoPath) -> Result<Vec<ManifestEntry>> {
        if let Some(bytes) = self.storage.read_workspace_manifest(ws, dir).await? {
            return manifest::decode(&bytes);
        }
        Ok(self.base_entries_at(dir).await?.unwrap_or_default())
    }

    /// Base commit's entries at `dir` by a pure base-manifest walk.
    async fn base_entries_at(&self, dir: &RepoPath) -> Result<Option<Vec<ManifestEntry>>> {
        let mut entries = self.base_root_entries().await?;
        for name in dir.components() {
            let Some(child) = entries.iter().find(|e| &e.name == name && e.is_directory) else {
                return Ok(None);
            };
            entries = manifest::decode(&self.storage.read_manifest(&child.hash).await?)?;
        }
        Ok(Some(entries))
    }

    /// Mutate the shadow manifest at `dir` (inherit-on-first-touch), then
    /// bubble the updated directory hashes up to the root so the whole
    /// shadow chain stays consistent.
    async fn rewrite_directory(
        &self,
        ws: &WorkspaceId,
        dir: &RepoPath,
        mutate: impl FnOnce(&mut Vec<ManifestEntry>),
    ) -> Result<()> {
        let mut entries = self.materialize_shadow(ws, dir).await?;
        mutate(&mut entries);
        let mut bytes = manifest::encode(&entries);
        self.storage.write_workspace_manifest(ws, dir, &bytes).await?;

        let mut child = dir.clone();
        while let Some((parent, name)) = child.split_last().map(|(p, n)| (p, n.to_string())) {
            let dir_entry =
                ManifestEntry::directory(ContentHash::of(&bytes), bytes.len() as i64, name);
            let mut parent_entries = self.materialize_shadow(ws, &parent).await?;
            upsert(&mut parent_entries, dir_entry);
            bytes = manifest::encode(&parent_entries);
            self.storage
                .write_workspace_manifest(ws, &parent, &bytes)
                .await?;
            child = parent;
        }
        Ok(())
    }
}

fn by_name(entries: Vec<ManifestEntry>) -> BTreeMap<String, ManifestEntry> {
    entries.into_iter().map(|e| (e.name.clone(), e)).collect()
}

fn upsert(entries: &mut Vec<ManifestEntry>, entry: ManifestEntry) {
    match entries.iter_mut().find(|e| e.name == entry.name) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}
