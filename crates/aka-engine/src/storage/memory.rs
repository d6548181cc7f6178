//! In-memory storage backend.
//!
//! Every namespace is a `DashMap`, so reads are lock-free and the branch CAS
//! is linearizable through the map's per-shard entry lock. This backend is
//! the consistency reference for the adapter contract and what the test
//! suite runs against.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use aka_core::{
    BranchPointer, CommitId, CommitMetadata, ContentHash, CowReference, Error, RepoPath, Result,
    Tombstone, WorkspaceId, WorkspaceMetadata,
};

use super::Storage;

#[derive(Default)]
pub struct MemoryStorage {
    objects: DashMap<ContentHash, Vec<u8>>,
    manifests: DashMap<ContentHash, Vec<u8>>,
    tombstones: DashMap<ContentHash, Tombstone>,
    commit_metadata: DashMap<CommitId, CommitMetadata>,
    root_manifests: DashMap<CommitId, Vec<u8>>,
    branches: DashMap<String, BranchPointer>,
    commit_counter: AtomicU64,
    workspaces: DashMap<WorkspaceId, WorkspaceMetadata>,
    workspace_files: DashMap<(WorkspaceId, RepoPath), Vec<u8>>,
    cow_references: DashMap<(WorkspaceId, RepoPath), CowReference>,
    workspace_manifests: DashMap<(WorkspaceId, RepoPath), Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct objects currently stored. Lets tests assert the
    /// deduplication properties of publish by byte-counting the backend.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Total bytes held in the object namespace.
    pub fn object_bytes(&self) -> usize {
        self.objects.iter().map(|r| r.value().len()).sum()
    }

    /// Number of distinct manifest blobs currently stored.
    pub fn manifest_count(&self) -> usize {
        self.manifests.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read_object(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        if let Some(t) = self.tombstones.get(hash) {
            return Err(Error::ObjectDeleted {
                hash: hash.clone(),
                tombstone: t.value().clone(),
            });
        }
        self.objects
            .get(hash)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::FileNotFound(hash.to_string()))
    }

    async fn write_object(&self, bytes: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::of(bytes);
        self.objects
            .entry(hash.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(hash)
    }

    async fn object_exists(&self, hash: &ContentHash) -> Result<bool> {
        Ok(self.objects.contains_key(hash) && !self.tombstones.contains_key(hash))
    }

    async fn object_size(&self, hash: &ContentHash) -> Result<i64> {
        self.objects
            .get(hash)
            .map(|r| r.value().len() as i64)
            .ok_or_else(|| Error::FileNotFound(hash.to_string()))
    }

    async fn delete_object(&self, hash: &ContentHash) -> Result<()> {
        self.objects.remove(hash);
        Ok(())
    }

    async fn read_tombstone(&self, hash: &ContentHash) -> Result<Option<Tombstone>> {
        Ok(self.tombstones.get(hash).map(|r| r.value().clone()))
    }

    async fn write_tombstone(&self, hash: &ContentHash, tombstone: &Tombstone) -> Result<()> {
        self.tombstones.insert(hash.clone(), tombstone.clone());
        Ok(())
    }

    async fn list_tombstones(&self) -> Result<Vec<(ContentHash, Tombstone)>> {
        Ok(self
            .tombstones
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }

    async fn read_manifest(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        self.manifests
            .get(hash)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::FileNotFound(hash.to_string()))
    }

    async fn write_manifest(&self, bytes: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::of(bytes);
        self.manifests
            .entry(hash.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(hash)
    }

    async fn read_root_manifest(&self, commit: &CommitId) -> Result<Vec<u8>> {
        self.root_manifests
            .get(commit)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::CommitNotFound(commit.clone()))
    }

    async fn write_root_manifest(&self, commit: &CommitId, bytes: &[u8]) -> Result<()> {
        self.root_manifests.insert(commit.clone(), bytes.to_vec());
        Ok(())
    }

    async fn read_commit_metadata(&self, commit: &CommitId) -> Result<CommitMetadata> {
        self.commit_metadata
            .get(commit)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::CommitNotFound(commit.clone()))
    }

    async fn write_commit_metadata(
        &self,
        commit: &CommitId,
        meta: &CommitMetadata,
    ) -> Result<()> {
        self.commit_metadata.insert(commit.clone(), meta.clone());
        Ok(())
    }

    async fn read_branch(&self, name: &str) -> Result<BranchPointer> {
        self.branches
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))
    }

    async fn update_branch(
        &self,
        name: &str,
        expected: Option<&CommitId>,
        new_commit: &CommitId,
    ) -> Result<()> {
        // The entry guard holds the shard lock, so compare and swap are one
        // atomic step with respect to other updates of the same branch.
        match self.branches.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => match expected {
                Some(e) if occupied.get().head == *e => {
                    occupied.insert(BranchPointer {
                        head: new_commit.clone(),
                    });
                    Ok(())
                }
                _ => Err(Error::BranchConflict(name.to_string())),
            },
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Err(Error::BranchConflict(name.to_string()));
                }
                vacant.insert(BranchPointer {
                    head: new_commit.clone(),
                });
                Ok(())
            }
        }
    }

    async fn list_branches(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.branches.iter().map(|r| r.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn next_commit_number(&self) -> Result<u64> {
        Ok(self.commit_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn read_workspace_metadata(&self, ws: &WorkspaceId) -> Result<WorkspaceMetadata> {
        self.workspaces
            .get(ws)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::WorkspaceNotFound(ws.clone()))
    }

    async fn write_workspace_metadata(
        &self,
        ws: &WorkspaceId,
        meta: &WorkspaceMetadata,
    ) -> Result<()> {
        self.workspaces.insert(ws.clone(), meta.clone());
        Ok(())
    }

    async fn workspace_exists(&self, ws: &WorkspaceId) -> Result<bool> {
        Ok(self.workspaces.contains_key(ws))
    }

    async fn delete_workspace(&self, ws: &WorkspaceId) -> Result<()> {
        self.workspaces.remove(ws);
        self.workspace_files.retain(|(w, _), _| w != ws);
        self.cow_references.retain(|(w, _), _| w != ws);
        self.workspace_manifests.retain(|(w, _), _| w != ws);
        Ok(())
    }

    async fn read_workspace_file(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self
            .workspace_files
            .get(&(ws.clone(), path.clone()))
            .map(|r| r.value().clone()))
    }

    async fn write_workspace_file(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
        bytes: &[u8],
    ) -> Result<()> {
        self.workspace_files
            .insert((ws.clone(), path.clone()), bytes.to_vec());
        Ok(())
    }

    async fn delete_workspace_file(&self, ws: &WorkspaceId, path: &RepoPath) -> Result<()> {
        self.workspace_files.remove(&(ws.clone(), path.clone()));
        Ok(())
    }

    async fn read_cow_reference(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
    ) -> Result<Option<CowReference>> {
        Ok(self
            .cow_references
            .get(&(ws.clone(), path.clone()))
            .map(|r| r.value().clone()))
    }

    async fn write_cow_reference(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
        reference: &CowReference,
    ) -> Result<()> {
        self.cow_references
            .insert((ws.clone(), path.clone()), reference.clone());
        Ok(())
    }

    async fn delete_cow_reference(&self, ws: &WorkspaceId, path: &RepoPath) -> Result<()> {
        self.cow_references.remove(&(ws.clone(), path.clone()));
        Ok(())
    }

    async fn read_workspace_manifest(
        &self,
        ws: &WorkspaceId,
        dir: &RepoPath,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self
            .workspace_manifests
            .get(&(ws.clone(), dir.clone()))
            .map(|r| r.value().clone()))
    }

    async fn write_workspace_manifest(
        &self,
        ws: &WorkspaceId,
        dir: &RepoPath,
        bytes: &[u8],
    ) -> Result<()> {
        self.workspace_manifests
            .insert((ws.clone(), dir.clone()), bytes.to_vec());
        Ok(())
    }
}
