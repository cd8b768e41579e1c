//! Core library for reel, a video ingestion and adaptive-bitrate
//! transcoding pipeline. Uploaded sources are pulled from object
//! storage, encoded into an HLS rendition ladder with ffmpeg, published
//! back with a master manifest, and tracked through a SQLite status
//! store.

pub mod catalog;
pub mod config;
pub mod error;
pub mod manifest;
pub mod paths;
pub mod pipeline;
mod sqlite;
pub mod status;
pub mod storage;
pub mod transcode;

pub use catalog::{plan_renditions, QualityTier, DEFAULT_CATALOG};
pub use config::{
    load_pipeline_config, load_reel_config, ConfigBundle, PipelineConfig, ReelConfig,
};
pub use error::ConfigError;
pub use manifest::{render_master, MasterVariant};
pub use pipeline::{
    generate_asset_id, IngestPipeline, JobEvent, JobReport, PipelineError, ProcessingJob,
    RenditionOutcome, RenditionResult, RetryPolicy, WorkerOptions,
};
pub use status::{
    AssetFilter, AssetRecord, ProcessingState, SqliteStatusStore, StatusError, StatusPublisher,
};
pub use storage::{FsObjectStore, ObjectStore, RemotePath, StorageError};
pub use transcode::{FfmpegEngine, SourceProbe, TranscodeEngine, TranscodeError};
