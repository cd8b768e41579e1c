use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReelConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub storage: StorageSection,
    pub limits: LimitsSection,
}

impl ReelConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.data_dir).join(path)
        }
    }

    pub fn assets_db_path(&self) -> PathBuf {
        Path::new(&self.paths.data_dir).join("assets.sqlite")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub scratch_dir: String,
    pub data_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub root_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub transcode: TranscodeSection,
    pub hls: HlsSection,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeSection {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub preset: String,
    pub audio_bitrate: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HlsSection {
    pub segment_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub delay_seconds: [u32; 2],
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub reel: ReelConfig,
    pub pipeline: PipelineConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let reel = load_reel_config(dir.join("reel.toml"))?;
        let pipeline = load_pipeline_config(dir.join("pipeline.toml"))?;
        Ok(Self { reel, pipeline })
    }
}

pub fn load_reel_config<P: AsRef<Path>>(path: P) -> Result<ReelConfig> {
    load_toml(path)
}

pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
