//! Storage backend selection.
//!
//! A [`StorageConfig`] is the serializable description of where a repository
//! lives. Profile and credential files are a caller concern; this is only
//! the engine-level wiring from a config value to a ready adapter.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use aka_core::Result;

use crate::storage::memory::MemoryStorage;
use crate::storage::opendal::OpendalStorage;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Volatile in-process store; useful for tests and scratch work.
    Memory,
    /// Local filesystem or NAS mount.
    Fs { root: PathBuf },
    /// S3-compatible object store. Credentials come from the environment.
    #[cfg(feature = "s3")]
    S3 {
        bucket: String,
        region: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
}

impl StorageConfig {
    /// Build the configured storage adapter.
    pub fn build(&self) -> Result<Arc<dyn Storage>> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryStorage::new())),
            Self::Fs { root } => Ok(Arc::new(OpendalStorage::filesystem(
                &root.to_string_lossy(),
            )?)),
            #[cfg(feature = "s3")]
            Self::S3 {
                bucket,
                region,
                endpoint,
                prefix,
            } => Ok(Arc::new(OpendalStorage::s3(
                bucket,
                region,
                endpoint.as_deref(),
                prefix.as_deref(),
            )?)),
        }
    }
}
