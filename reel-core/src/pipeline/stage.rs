//! Scratch workspace and object staging.
//!
//! Each job gets its own directory under the scratch root. The source
//! is downloaded there, renditions are encoded into per-tier
//! subdirectories, and the whole tree is removed when the job finishes
//! regardless of outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::catalog::QualityTier;
use crate::paths::{variant_dir, variant_index, VIDEOS_BUCKET};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::types::ProcessingJob;
use crate::storage::{content_type_for, ObjectStore, RemotePath, StorageError};

/// Local layout of one in-flight job.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    pub root: PathBuf,
    pub source_file: PathBuf,
}

impl JobWorkspace {
    pub fn rendition_dir(&self, tier: &QualityTier) -> PathBuf {
        self.root.join(tier.name)
    }
}

#[derive(Clone)]
pub struct ObjectStage {
    scratch_root: PathBuf,
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for ObjectStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStage")
            .field("scratch_root", &self.scratch_root)
            .finish()
    }
}

impl ObjectStage {
    pub fn new(scratch_root: impl Into<PathBuf>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            store,
        }
    }

    /// Creates the job directory and downloads the source into it. On
    /// any failure the partially created directory is removed so a
    /// retried download starts clean.
    pub async fn prepare(&self, job: &ProcessingJob) -> PipelineResult<JobWorkspace> {
        let root = self.scratch_root.join(&job.asset_id);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: root.clone(),
            })?;

        let result = self.download_source(job, &root).await;
        match result {
            Ok(source_file) => Ok(JobWorkspace { root, source_file }),
            Err(err) => {
                if let Err(cleanup_err) = tokio::fs::remove_dir_all(&root).await {
                    warn!(
                        asset_id = %job.asset_id,
                        error = %cleanup_err,
                        "failed to remove workspace after download error"
                    );
                }
                Err(err)
            }
        }
    }

    async fn download_source(&self, job: &ProcessingJob, root: &Path) -> PipelineResult<PathBuf> {
        let remote = RemotePath::parse(&job.source_object).map_err(|source| {
            PipelineError::Download {
                asset_id: job.asset_id.clone(),
                source,
            }
        })?;
        let extension = remote.extension().unwrap_or("mp4");
        let source_file = root.join(format!("original.{extension}"));
        self.store
            .download(&remote.bucket, &remote.object, &source_file)
            .await
            .map_err(|source| PipelineError::Download {
                asset_id: job.asset_id.clone(),
                source,
            })?;

        let digest = file_sha256(&source_file).await?;
        debug!(
            asset_id = %job.asset_id,
            source = %source_file.display(),
            sha256 = %digest,
            "source staged"
        );
        Ok(source_file)
    }

    /// Uploads every file an encoder left in a rendition directory,
    /// returning the remote directory prefix.
    pub async fn publish_rendition(
        &self,
        job: &ProcessingJob,
        tier: &QualityTier,
        local_dir: &Path,
    ) -> PipelineResult<String> {
        let remote_dir = variant_dir(&job.owner_id, &job.asset_id, tier.name);
        let mut entries = tokio::fs::read_dir(local_dir)
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: local_dir.to_path_buf(),
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: local_dir.to_path_buf(),
            })?
        {
            let local = entry.path();
            if !local.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let object = format!("{remote_dir}/{file_name}");
            self.store
                .upload(VIDEOS_BUCKET, &object, &local, content_type_for(&local))
                .await
                .map_err(|source| PipelineError::Upload {
                    object: object.clone(),
                    source,
                })?;
        }

        // The master manifest may only reference variant playlists that
        // exist in durable storage, so a rendition without one is a
        // failed rendition even if its segments uploaded.
        let playlist_object = variant_index(&job.owner_id, &job.asset_id, tier.name);
        let playlist_present = self
            .store
            .exists(VIDEOS_BUCKET, &playlist_object)
            .await
            .map_err(|source| PipelineError::Upload {
                object: playlist_object.clone(),
                source,
            })?;
        if !playlist_present {
            return Err(PipelineError::Upload {
                object: playlist_object.clone(),
                source: StorageError::NotFound {
                    bucket: VIDEOS_BUCKET.to_string(),
                    object: playlist_object,
                },
            });
        }
        Ok(remote_dir)
    }

    pub async fn upload_master(
        &self,
        object: &str,
        local: &Path,
    ) -> PipelineResult<String> {
        self.store
            .upload(VIDEOS_BUCKET, object, local, content_type_for(local))
            .await
            .map_err(|source| PipelineError::Upload {
                object: object.to_string(),
                source,
            })
    }

    /// Removes the job workspace. Never fails the job; a leaked scratch
    /// directory is an operator concern, not a pipeline error.
    pub async fn cleanup(&self, workspace: &JobWorkspace) {
        if let Err(err) = tokio::fs::remove_dir_all(&workspace.root).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %workspace.root.display(),
                    error = %err,
                    "failed to remove job workspace"
                );
            }
        }
    }

    /// Deletes the uploaded original after the manifest is durable.
    /// Best-effort: the asset is already serveable at this point.
    pub async fn delete_source(&self, job: &ProcessingJob) {
        let remote = match RemotePath::parse(&job.source_object) {
            Ok(remote) => remote,
            Err(err) => {
                warn!(asset_id = %job.asset_id, error = %err, "source object path unparseable");
                return;
            }
        };
        match self.store.delete(&remote.bucket, &remote.object).await {
            Ok(()) => debug!(asset_id = %job.asset_id, "source object deleted"),
            Err(StorageError::NotFound { .. }) => {}
            Err(err) => {
                warn!(asset_id = %job.asset_id, error = %err, "failed to delete source object");
            }
        }
    }
}

async fn file_sha256(path: &Path) -> PipelineResult<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| PipelineError::Io {
            source,
            path: path.to_path_buf(),
        })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::catalog::DEFAULT_CATALOG;
    use crate::storage::FsObjectStore;

    fn stage(objects: &TempDir, scratch: &TempDir) -> ObjectStage {
        ObjectStage::new(
            scratch.path(),
            Arc::new(FsObjectStore::new(objects.path())),
        )
    }

    #[tokio::test]
    async fn prepare_downloads_source_into_workspace() {
        let objects = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let seed = objects.path().join("videos/u1/a1");
        tokio::fs::create_dir_all(&seed).await.unwrap();
        tokio::fs::write(seed.join("original.mov"), b"source").await.unwrap();

        let stage = stage(&objects, &scratch);
        let job = ProcessingJob::new("a1", "u1", "videos/u1/a1/original.mov");
        let workspace = stage.prepare(&job).await.unwrap();

        assert_eq!(workspace.root, scratch.path().join("a1"));
        assert_eq!(workspace.source_file, workspace.root.join("original.mov"));
        assert_eq!(
            tokio::fs::read(&workspace.source_file).await.unwrap(),
            b"source"
        );
    }

    #[tokio::test]
    async fn prepare_removes_workspace_when_download_fails() {
        let objects = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let stage = stage(&objects, &scratch);
        let job = ProcessingJob::new("a1", "u1", "videos/u1/a1/original.mp4");

        let err = stage.prepare(&job).await;
        assert!(matches!(err, Err(PipelineError::Download { .. })));
        assert!(!scratch.path().join("a1").exists());
    }

    #[tokio::test]
    async fn publish_rendition_uploads_playlist_and_segments() {
        let objects = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let stage = stage(&objects, &scratch);
        let job = ProcessingJob::new("a1", "u1", "videos/u1/a1/original.mp4");
        let tier = DEFAULT_CATALOG[1]; // 480p

        let local = scratch.path().join("a1/480p");
        tokio::fs::create_dir_all(&local).await.unwrap();
        tokio::fs::write(local.join("index.m3u8"), b"#EXTM3U\n").await.unwrap();
        tokio::fs::write(local.join("segment_000.ts"), b"ts0").await.unwrap();
        tokio::fs::write(local.join("segment_001.ts"), b"ts1").await.unwrap();

        let remote_dir = stage.publish_rendition(&job, &tier, &local).await.unwrap();
        assert_eq!(remote_dir, "u1/a1/480p");

        let bucket = objects.path().join("videos/u1/a1/480p");
        assert!(bucket.join("index.m3u8").is_file());
        assert!(bucket.join("segment_000.ts").is_file());
        assert!(bucket.join("segment_001.ts").is_file());
    }

    #[tokio::test]
    async fn publish_rendition_without_playlist_is_an_error() {
        let objects = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let stage = stage(&objects, &scratch);
        let job = ProcessingJob::new("a1", "u1", "videos/u1/a1/original.mp4");
        let tier = DEFAULT_CATALOG[1];

        // Segments but no index.m3u8, as a crashed encoder leaves them.
        let local = scratch.path().join("a1/480p");
        tokio::fs::create_dir_all(&local).await.unwrap();
        tokio::fs::write(local.join("segment_000.ts"), b"ts0").await.unwrap();

        let err = stage.publish_rendition(&job, &tier, &local).await;
        match err {
            Err(PipelineError::Upload { object, .. }) => {
                assert_eq!(object, "u1/a1/480p/index.m3u8");
            }
            other => panic!("expected upload error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cleanup_and_delete_source_are_best_effort() {
        let objects = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let stage = stage(&objects, &scratch);
        let job = ProcessingJob::new("a1", "u1", "videos/u1/a1/original.mp4");

        // Neither the workspace nor the source exist; both calls must
        // swallow the miss.
        let workspace = JobWorkspace {
            root: scratch.path().join("a1"),
            source_file: scratch.path().join("a1/original.mp4"),
        };
        stage.cleanup(&workspace).await;
        stage.delete_source(&job).await;
    }
}
