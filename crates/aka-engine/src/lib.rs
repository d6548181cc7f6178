//! The Akashica repository engine.
//!
//! Akashica versions large binary content with Git-like semantics — immutable
//! commits, branches, mutable workspaces — on top of a content-addressed
//! object store that can live on a local filesystem or in S3-compatible
//! object storage.
//!
//! The pieces, bottom up:
//!
//! - [`storage::Storage`] — the async adapter every backend implements;
//!   [`MemoryStorage`] and [`OpendalStorage`] are the two shipped backends.
//! - [`Session`] — a handle bound to a commit (read-only) or workspace
//!   (read-write), exposing path-oriented reads, writes, status and diff.
//! - [`Repository`] — the factory for sessions and the home of workspace
//!   lifecycle, publish, history, branch reset, and content scrubbing.
//!
//! ```no_run
//! use std::sync::Arc;
//! use aka_engine::{MemoryStorage, Repository};
//! use aka_core::ChangesetRef;
//!
//! # async fn demo() -> aka_core::Result<()> {
//! let repo = Repository::init(Arc::new(MemoryStorage::new())).await?;
//! let ws = repo.create_workspace_on_branch("main", "alice").await?;
//! let session = repo.session(ChangesetRef::Workspace(ws.clone())).await?;
//! session.write_file("README.md", b"hello").await?;
//! let commit = repo.publish_workspace(&ws, "main", "init", "alice").await?;
//! # let _ = commit;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod repository;
pub mod session;
pub mod storage;

pub use config::StorageConfig;
pub use repository::{Repository, DEFAULT_BRANCH};
pub use session::{Session, WorkspaceStatus};
pub use storage::memory::MemoryStorage;
pub use storage::opendal::OpendalStorage;
pub use storage::Storage;
