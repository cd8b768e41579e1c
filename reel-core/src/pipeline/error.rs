use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::status::StatusError;
use crate::storage::StorageError;
use crate::transcode::TranscodeError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to fetch source for asset {asset_id}: {source}")]
    Download {
        asset_id: String,
        source: StorageError,
    },
    #[error("source probe failed: {0}")]
    Probe(#[from] TranscodeError),
    #[error("failed to upload {object}: {source}")]
    Upload {
        object: String,
        source: StorageError,
    },
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("every rendition failed for asset {asset_id} ({attempted} attempted)")]
    AllTiersFailed { asset_id: String, attempted: usize },
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
