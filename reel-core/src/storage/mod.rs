//! Durable object storage boundary.
//!
//! The pipeline only ever talks to storage through [`ObjectStore`]; the
//! production backend (MinIO, S3) lives outside this crate. The bundled
//! [`FsObjectStore`] backs tests and single-node deployments.

mod fs;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use fs::FsObjectStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {bucket}/{object}")]
    NotFound { bucket: String, object: String },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("invalid remote path: {0}")]
    InvalidPath(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A `<bucket>/<object>` reference as stored in job records and asset
/// rows. The object part may itself contain slashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub bucket: String,
    pub object: String,
}

impl RemotePath {
    pub fn new(bucket: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
        }
    }

    pub fn parse(raw: &str) -> StorageResult<Self> {
        match raw.split_once('/') {
            Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => {
                Ok(Self::new(bucket, object))
            }
            _ => Err(StorageError::InvalidPath(raw.to_string())),
        }
    }

    /// File extension of the object key, if any.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.object).extension().and_then(|ext| ext.to_str())
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.object)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Downloads one object into a local file, creating parent
    /// directories as needed.
    async fn download(&self, bucket: &str, object: &str, dest: &Path) -> StorageResult<()>;

    /// Uploads one local file, returning the stored `<bucket>/<object>`
    /// path.
    async fn upload(
        &self,
        bucket: &str,
        object: &str,
        source: &Path,
        content_type: &str,
    ) -> StorageResult<String>;

    async fn delete(&self, bucket: &str, object: &str) -> StorageResult<()>;

    async fn exists(&self, bucket: &str, object: &str) -> StorageResult<bool>;
}

/// Content type for uploaded pipeline artifacts, keyed by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}
