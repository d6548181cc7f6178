//! Object-store backend over an [`opendal::Operator`].
//!
//! One implementation covers local filesystems and S3-compatible stores;
//! the service is chosen when the operator is built. Key layout:
//!
//! ```text
//! objects/<h0..2>/<h2..4>/<h4..>.dat    # file blobs, sharded by hash prefix
//! objects/<h0..2>/<h2..4>/<h4..>.dir   # directory manifest blobs
//! objects/<h0..2>/<h2..4>/<h4..>.tomb  # tombstones (JSON)
//! commits/<id>/metadata.json
//! commits/<id>/root
//! branches/<name>
//! meta/commit-counter
//! workspaces/<base>$<suffix>/metadata.json
//! workspaces/<base>$<suffix>/files/<path>
//! workspaces/<base>$<suffix>/cow/<path>.json
//! workspaces/<base>$<suffix>/manifests/<encoded-dir>.dir
//! ```
//!
//! Branch CAS and the commit counter serialize through an in-process mutex;
//! read-compare-write under the lock gives the full linearizable contract
//! for single-process deployments, while cross-process safety is only as
//! strong as the backing service's conditional writes.

use ::opendal::{services, ErrorKind, Operator};
use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;

use aka_core::{
    BranchPointer, CommitId, CommitMetadata, ContentHash, CowReference, Error, RepoPath, Result,
    Tombstone, WorkspaceId, WorkspaceMetadata,
};

use super::Storage;

pub struct OpendalStorage {
    op: Operator,
    // Guards branch pointers and the commit counter; see module docs.
    cas_lock: Mutex<()>,
}

impl OpendalStorage {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            cas_lock: Mutex::new(()),
        }
    }

    /// Backend rooted at a local directory (NAS mounts included).
    pub fn filesystem(root: &str) -> Result<Self> {
        let op = Operator::new(services::Fs::default().root(root))
            .context("building filesystem operator")?
            .finish();
        Ok(Self::new(op))
    }

    /// Purely in-memory operator. Exercises the same key layout as the
    /// durable services.
    pub fn in_memory() -> Result<Self> {
        let op = Operator::new(services::Memory::default())
            .context("building memory operator")?
            .finish();
        Ok(Self::new(op))
    }

    /// S3-compatible backend. Credentials come from the environment / the
    /// usual AWS provider chain.
    #[cfg(feature = "s3")]
    pub fn s3(
        bucket: &str,
        region: &str,
        endpoint: Option<&str>,
        prefix: Option<&str>,
    ) -> Result<Self> {
        let mut builder = services::S3::default().bucket(bucket).region(region);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(prefix) = prefix {
            builder = builder.root(prefix);
        }
        let op = Operator::new(builder)
            .context("building s3 operator")?
            .finish();
        Ok(Self::new(op))
    }

    async fn read_key(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.op.read(key).await {
            Ok(buffer) => Ok(Some(buffer.to_vec())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn counter_value(&self) -> Result<u64> {
        match self.read_key(COUNTER_KEY).await? {
            Some(bytes) => String::from_utf8(bytes)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| {
                    Error::Storage(anyhow::anyhow!("corrupt commit counter at {COUNTER_KEY}"))
                }),
            None => Ok(0),
        }
    }
}

const COUNTER_KEY: &str = "meta/commit-counter";

fn storage_err(e: ::opendal::Error) -> Error {
    Error::Storage(anyhow::Error::new(e))
}

fn sharded_key(hash: &ContentHash, extension: &str) -> String {
    let h = hash.as_str();
    format!("objects/{}/{}/{}.{extension}", &h[..2], &h[2..4], &h[4..])
}

fn commit_metadata_key(commit: &CommitId) -> String {
    format!("commits/{commit}/metadata.json")
}

fn commit_root_key(commit: &CommitId) -> String {
    format!("commits/{commit}/root")
}

fn branch_key(name: &str) -> String {
    format!("branches/{name}")
}

fn workspace_prefix(ws: &WorkspaceId) -> String {
    format!("workspaces/{ws}/")
}

fn workspace_metadata_key(ws: &WorkspaceId) -> String {
    format!("workspaces/{ws}/metadata.json")
}

fn workspace_file_key(ws: &WorkspaceId, path: &RepoPath) -> String {
    format!("workspaces/{ws}/files/{path}")
}

fn cow_reference_key(ws: &WorkspaceId, path: &RepoPath) -> String {
    format!("workspaces/{ws}/cow/{path}.json")
}

/// Shadow manifests are keyed by directory path flattened into a single key
/// segment. A nested encoding would break on filesystem services, where
/// `manifests/a` cannot be both a blob and a prefix of `manifests/a/b`.
/// The root directory maps to `%2F`, which no encoded non-root path can
/// produce because literal `%` is escaped first.
fn workspace_manifest_key(ws: &WorkspaceId, dir: &RepoPath) -> String {
    let encoded = if dir.is_root() {
        "%2F".to_string()
    } else {
        dir.to_string().replace('%', "%25").replace('/', "%2F")
    };
    format!("workspaces/{ws}/manifests/{encoded}.dir")
}

#[async_trait]
impl Storage for OpendalStorage {
    async fn read_object(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        if let Some(tombstone) = self.read_tombstone(hash).await? {
            return Err(Error::ObjectDeleted {
                hash: hash.clone(),
                tombstone,
            });
        }
        self.read_key(&sharded_key(hash, "dat"))
            .await?
            .ok_or_else(|| Error::FileNotFound(hash.to_string()))
    }

    async fn write_object(&self, bytes: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::of(bytes);
        let key = sharded_key(&hash, "dat");
        if !self.op.exists(&key).await.map_err(storage_err)? {
            self.op
                .write(&key, bytes.to_vec())
                .await
                .map_err(storage_err)?;
        }
        Ok(hash)
    }

    async fn object_exists(&self, hash: &ContentHash) -> Result<bool> {
        if self
            .op
            .exists(&sharded_key(hash, "tomb"))
            .await
            .map_err(storage_err)?
        {
            return Ok(false);
        }
        self.op
            .exists(&sharded_key(hash, "dat"))
            .await
            .map_err(storage_err)
    }

    async fn object_size(&self, hash: &ContentHash) -> Result<i64> {
        match self.op.stat(&sharded_key(hash, "dat")).await {
            Ok(meta) => Ok(meta.content_length() as i64),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::FileNotFound(hash.to_string()))
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn delete_object(&self, hash: &ContentHash) -> Result<()> {
        self.op
            .delete(&sharded_key(hash, "dat"))
            .await
            .map_err(storage_err)
    }

    async fn read_tombstone(&self, hash: &ContentHash) -> Result<Option<Tombstone>> {
        match self.read_key(&sharded_key(hash, "tomb")).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("decoding tombstone")?,
            )),
            None => Ok(None),
        }
    }

    async fn write_tombstone(&self, hash: &ContentHash, tombstone: &Tombstone) -> Result<()> {
        let bytes = serde_json::to_vec(tombstone).context("encoding tombstone")?;
        self.op
            .write(&sharded_key(hash, "tomb"), bytes)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_tombstones(&self) -> Result<Vec<(ContentHash, Tombstone)>> {
        let entries = match self.op.list_with("objects/").recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(e)),
        };

        let mut tombstones = Vec::new();
        for entry in entries {
            if !entry.path().ends_with(".tomb") {
                continue;
            }
            if let Some(bytes) = self.read_key(entry.path()).await? {
                let tombstone: Tombstone =
                    serde_json::from_slice(&bytes).context("decoding tombstone")?;
                tombstones.push((tombstone.deleted_hash.clone(), tombstone));
            }
        }
        Ok(tombstones)
    }

    async fn read_manifest(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        self.read_key(&sharded_key(hash, "dir"))
            .await?
            .ok_or_else(|| Error::FileNotFound(hash.to_string()))
    }

    async fn write_manifest(&self, bytes: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::of(bytes);
        let key = sharded_key(&hash, "dir");
        if !self.op.exists(&key).await.map_err(storage_err)? {
            self.op
                .write(&key, bytes.to_vec())
                .await
                .map_err(storage_err)?;
        }
        Ok(hash)
    }

    async fn read_root_manifest(&self, commit: &CommitId) -> Result<Vec<u8>> {
        self.read_key(&commit_root_key(commit))
            .await?
            .ok_or_else(|| Error::CommitNotFound(commit.clone()))
    }

    async fn write_root_manifest(&self, commit: &CommitId, bytes: &[u8]) -> Result<()> {
        self.op
            .write(&commit_root_key(commit), bytes.to_vec())
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn read_commit_metadata(&self, commit: &CommitId) -> Result<CommitMetadata> {
        let bytes = self
            .read_key(&commit_metadata_key(commit))
            .await?
            .ok_or_else(|| Error::CommitNotFound(commit.clone()))?;
        Ok(serde_json::from_slice(&bytes).context("decoding commit metadata")?)
    }

    async fn write_commit_metadata(
        &self,
        commit: &CommitId,
        meta: &CommitMetadata,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(meta).context("encoding commit metadata")?;
        self.op
            .write(&commit_metadata_key(commit), bytes)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn read_branch(&self, name: &str) -> Result<BranchPointer> {
        let bytes = self
            .read_key(&branch_key(name))
            .await?
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))?;
        Ok(serde_json::from_slice(&bytes).context("decoding branch pointer")?)
    }

    async fn update_branch(
        &self,
        name: &str,
        expected: Option<&CommitId>,
        new_commit: &CommitId,
    ) -> Result<()> {
        let _guard = self.cas_lock.lock().await;

        let current = match self.read_key(&branch_key(name)).await? {
            Some(bytes) => {
                let pointer: BranchPointer =
                    serde_json::from_slice(&bytes).context("decoding branch pointer")?;
                Some(pointer.head)
            }
            None => None,
        };
        if current.as_ref() != expected {
            return Err(Error::BranchConflict(name.to_string()));
        }

        let pointer = BranchPointer {
            head: new_commit.clone(),
        };
        let bytes = serde_json::to_vec(&pointer).context("encoding branch pointer")?;
        self.op
            .write(&branch_key(name), bytes)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_branches(&self) -> Result<Vec<String>> {
        let entries = match self.op.list("branches/").await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(e)),
        };
        let mut names: Vec<String> = entries
            .iter()
            .filter(|e| e.metadata().mode().is_file())
            .map(|e| e.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn next_commit_number(&self) -> Result<u64> {
        let _guard = self.cas_lock.lock().await;
        let next = self.counter_value().await? + 1;
        self.op
            .write(COUNTER_KEY, next.to_string().into_bytes())
            .await
            .map_err(storage_err)?;
        Ok(next)
    }

    async fn read_workspace_metadata(&self, ws: &WorkspaceId) -> Result<WorkspaceMetadata> {
        let bytes = self
            .read_key(&workspace_metadata_key(ws))
            .await?
            .ok_or_else(|| Error::WorkspaceNotFound(ws.clone()))?;
        Ok(serde_json::from_slice(&bytes).context("decoding workspace metadata")?)
    }

    async fn write_workspace_metadata(
        &self,
        ws: &WorkspaceId,
        meta: &WorkspaceMetadata,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(meta).context("encoding workspace metadata")?;
        self.op
            .write(&workspace_metadata_key(ws), bytes)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn workspace_exists(&self, ws: &WorkspaceId) -> Result<bool> {
        self.op
            .exists(&workspace_metadata_key(ws))
            .await
            .map_err(storage_err)
    }

    async fn delete_workspace(&self, ws: &WorkspaceId) -> Result<()> {
        match self.op.remove_all(&workspace_prefix(ws)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn read_workspace_file(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
    ) -> Result<Option<Vec<u8>>> {
        self.read_key(&workspace_file_key(ws, path)).await
    }

    async fn write_workspace_file(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
        bytes: &[u8],
    ) -> Result<()> {
        self.op
            .write(&workspace_file_key(ws, path), bytes.to_vec())
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_workspace_file(&self, ws: &WorkspaceId, path: &RepoPath) -> Result<()> {
        self.op
            .delete(&workspace_file_key(ws, path))
            .await
            .map_err(storage_err)
    }

    async fn read_cow_reference(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
    ) -> Result<Option<CowReference>> {
        match self.read_key(&cow_reference_key(ws, path)).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).context("decoding COW reference")?,
            )),
            None => Ok(None),
        }
    }

    async fn write_cow_reference(
        &self,
        ws: &WorkspaceId,
        path: &RepoPath,
        reference: &CowReference,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(reference).context("encoding COW reference")?;
        self.op
            .write(&cow_reference_key(ws, path), bytes)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_cow_reference(&self, ws: &WorkspaceId, path: &RepoPath) -> Result<()> {
        self.op
            .delete(&cow_reference_key(ws, path))
            .await
            .map_err(storage_err)
    }

    async fn read_workspace_manifest(
        &self,
        ws: &WorkspaceId,
        dir: &RepoPath,
    ) -> Result<Option<Vec<u8>>> {
        self.read_key(&workspace_manifest_key(ws, dir)).await
    }

    async fn write_workspace_manifest(
        &self,
        ws: &WorkspaceId,
        dir: &RepoPath,
        bytes: &[u8],
    ) -> Result<()> {
        self.op
            .write(&workspace_manifest_key(ws, dir), bytes.to_vec())
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
