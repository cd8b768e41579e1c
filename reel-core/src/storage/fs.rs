use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ObjectStore, StorageError, StorageResult};

/// Filesystem-backed object store. Buckets are directories under the
/// configured root and object keys map to relative paths inside them.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, object: &str) -> PathBuf {
        self.root.join(bucket).join(object)
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn download(&self, bucket: &str, object: &str, dest: &Path) -> StorageResult<()> {
        let stored = self.object_path(bucket, object);
        self.ensure_parent(dest).await?;
        match tokio::fs::copy(&stored, dest).await {
            Ok(bytes) => {
                debug!(bucket, object, bytes, "downloaded object");
                Ok(())
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                })
            }
            Err(source) => Err(StorageError::Io {
                source,
                path: stored,
            }),
        }
    }

    async fn upload(
        &self,
        bucket: &str,
        object: &str,
        source: &Path,
        content_type: &str,
    ) -> StorageResult<String> {
        let dest = self.object_path(bucket, object);
        self.ensure_parent(&dest).await?;
        // Copy to a sibling first so readers never see a partial object.
        let staged = dest.with_extension("tmp-upload");
        tokio::fs::copy(source, &staged)
            .await
            .map_err(|source_err| StorageError::Io {
                source: source_err,
                path: source.to_path_buf(),
            })?;
        tokio::fs::rename(&staged, &dest)
            .await
            .map_err(|source| StorageError::Io {
                source,
                path: dest.clone(),
            })?;
        debug!(bucket, object, content_type, "uploaded object");
        Ok(format!("{bucket}/{object}"))
    }

    async fn delete(&self, bucket: &str, object: &str) -> StorageResult<()> {
        let stored = self.object_path(bucket, object);
        match tokio::fs::remove_file(&stored).await {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                })
            }
            Err(source) => Err(StorageError::Io {
                source,
                path: stored,
            }),
        }
    }

    async fn exists(&self, bucket: &str, object: &str) -> StorageResult<bool> {
        let stored = self.object_path(bucket, object);
        match tokio::fs::metadata(&stored).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::Io {
                source,
                path: stored,
            }),
        }
    }
}
