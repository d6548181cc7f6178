use thiserror::Error;

use crate::types::{CommitId, ContentHash, Tombstone, WorkspaceId};

/// The closed set of failure kinds surfaced by every engine operation.
///
/// The engine never retries; transient backend failures bubble up as
/// [`Error::Storage`] and retry policy belongs to the caller.
/// [`Error::BranchConflict`] is the one variant with an obvious recovery:
/// rebuild against the new head and publish again.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session is read-only")]
    SessionReadOnly,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Commit not found: {0}")]
    CommitNotFound(CommitId),

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(WorkspaceId),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Branch conflict: {0}")]
    BranchConflict(String),

    #[error("Refusing to reset '{branch}': {target} is not an ancestor of {head}")]
    NonAncestorReset {
        branch: String,
        head: CommitId,
        target: CommitId,
    },

    #[error("Object {hash} was deleted: {}", .tombstone.reason)]
    ObjectDeleted {
        hash: ContentHash,
        tombstone: Tombstone,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
