//! ffmpeg/ffprobe adapter.
//!
//! All external process access funnels through [`CommandExecutor`] so
//! tests can record argv and fake outputs instead of spawning real
//! encoders.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::catalog::QualityTier;
use crate::config::{HlsSection, TranscodeSection};
use crate::paths::{SEGMENT_PATTERN, VARIANT_PLAYLIST_NAME};

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} exited with status {status:?}: {stderr}")]
    Engine {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("no video stream in {path}")]
    MissingVideoStream { path: PathBuf },
    #[error("invalid ffprobe payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<std::process::Output> {
        command.output().await
    }
}

/// What rendition planning needs to know about a source file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceProbe {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

/// Seam between the job runner and the actual encoder. The production
/// implementation shells out to ffmpeg; tests substitute stubs that
/// write playlist files directly.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    async fn probe(&self, input: &Path) -> TranscodeResult<SourceProbe>;

    /// Encodes one HLS variant into `out_dir`, producing the variant
    /// playlist and its segments.
    async fn encode(&self, input: &Path, tier: &QualityTier, out_dir: &Path)
        -> TranscodeResult<()>;
}

pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    preset: String,
    audio_bitrate: String,
    segment_seconds: u32,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for FfmpegEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegEngine")
            .field("ffmpeg", &self.ffmpeg)
            .field("ffprobe", &self.ffprobe)
            .field("preset", &self.preset)
            .field("segment_seconds", &self.segment_seconds)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FfmpegEngine {
    pub fn new(
        transcode: &TranscodeSection,
        hls: &HlsSection,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            ffmpeg: transcode.ffmpeg_path.clone(),
            ffprobe: transcode.ffprobe_path.clone(),
            preset: transcode.preset.clone(),
            audio_bitrate: transcode.audio_bitrate.clone(),
            segment_seconds: hls.segment_seconds,
            timeout: Duration::from_secs(transcode.timeout_seconds),
            executor,
        }
    }

    fn encode_command(&self, input: &Path, tier: &QualityTier, out_dir: &Path) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command
            .kill_on_drop(true)
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg(&self.preset)
            .arg("-vf")
            .arg(format!("scale=-2:{}", tier.height))
            .arg("-b:v")
            .arg(tier.bitrate.to_string())
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(&self.audio_bitrate)
            .arg("-f")
            .arg("hls")
            .arg("-hls_time")
            .arg(self.segment_seconds.to_string())
            .arg("-hls_playlist_type")
            .arg("vod")
            .arg("-hls_segment_filename")
            .arg(out_dir.join(SEGMENT_PATTERN))
            .arg(out_dir.join(VARIANT_PLAYLIST_NAME));
        command
    }

    async fn run_checked(
        &self,
        program: &Path,
        mut command: Command,
    ) -> TranscodeResult<std::process::Output> {
        let program_name = program.display().to_string();
        let future = self.executor.run(&mut command);
        let output = match timeout(self.timeout, future).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(TranscodeError::Spawn {
                    program: program_name,
                    source,
                })
            }
            Err(_) => {
                return Err(TranscodeError::Timeout {
                    program: program_name,
                    timeout: self.timeout,
                })
            }
        };
        if !output.status.success() {
            return Err(TranscodeError::Engine {
                program: program_name,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn probe(&self, input: &Path) -> TranscodeResult<SourceProbe> {
        let mut command = Command::new(&self.ffprobe);
        command
            .kill_on_drop(true)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(input);
        let output = self.run_checked(&self.ffprobe, command).await?;
        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        let video = parsed
            .streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| TranscodeError::MissingVideoStream {
                path: input.to_path_buf(),
            })?;
        let (width, height) = match (video.width, video.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
            _ => {
                return Err(TranscodeError::MissingVideoStream {
                    path: input.to_path_buf(),
                })
            }
        };
        let duration_seconds = parsed
            .format
            .as_ref()
            .and_then(|format| format.duration.as_deref())
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or_default();
        debug!(
            input = %input.display(),
            width,
            height,
            duration_seconds,
            "probed source"
        );
        Ok(SourceProbe {
            width,
            height,
            duration_seconds,
        })
    }

    async fn encode(
        &self,
        input: &Path,
        tier: &QualityTier,
        out_dir: &Path,
    ) -> TranscodeResult<()> {
        let command = self.encode_command(input, tier, out_dir);
        self.run_checked(&self.ffmpeg, command).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}
