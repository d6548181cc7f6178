//! Core types for the Akashica content-addressed versioning engine.
//!
//! This crate holds everything the engine and its storage backends agree on:
//! the value types (hashes, commit and workspace ids, repository paths,
//! manifest entries, metadata records), the closed error set, and the
//! directory manifest codec. It performs no I/O.

pub mod error;
pub mod manifest;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    BranchPointer, ChangesetRef, CommitId, CommitMetadata, ContentHash, CowReference, FileChange,
    ManifestEntry, RepoPath, Tombstone, WorkspaceId, WorkspaceMetadata,
};
