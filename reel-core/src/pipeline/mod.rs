//! Ingest job queue and worker loop.
//!
//! [`IngestPipeline`] owns a FIFO queue with per-asset exclusivity:
//! jobs for different assets run concurrently up to the configured
//! limit, while a second job for an asset already in flight waits its
//! turn. Each job runs download, per-tier transcode, rendition upload,
//! manifest publication and status transitions, then removes its
//! scratch directory whatever the outcome.

pub mod error;
pub mod stage;
pub mod types;

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::catalog::{plan_renditions, QualityTier};
use crate::config::{PipelineConfig, ReelConfig};
use crate::manifest::{render_master, MasterVariant};
use crate::paths::{master_index, MASTER_PLAYLIST_NAME};
use crate::status::{ProcessingState, StatusPublisher};
use crate::storage::ObjectStore;
use crate::transcode::TranscodeEngine;

pub use error::{PipelineError, PipelineResult};
pub use stage::{JobWorkspace, ObjectStage};
pub use types::{
    generate_asset_id, JobEvent, JobReport, ProcessingJob, RenditionOutcome, RenditionResult,
    RetryPolicy,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub scratch_dir: PathBuf,
    pub retry: RetryPolicy,
    pub max_concurrent_jobs: usize,
    pub retry_sleep_cap: Duration,
}

impl WorkerOptions {
    pub fn from_config(
        reel: &ReelConfig,
        pipeline: &PipelineConfig,
    ) -> Result<Self, crate::error::ConfigError> {
        Ok(Self {
            scratch_dir: PathBuf::from(&reel.paths.scratch_dir),
            retry: RetryPolicy::try_from(&pipeline.retry)?,
            max_concurrent_jobs: reel.limits.max_concurrent_jobs.max(1),
            retry_sleep_cap: Duration::from_secs(60),
        })
    }

    pub fn with_retry_sleep_cap(mut self, cap: Duration) -> Self {
        self.retry_sleep_cap = cap;
        self
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queued: VecDeque<ProcessingJob>,
    in_flight: HashSet<String>,
    running: usize,
}

struct PipelineInner {
    state: Mutex<QueueState>,
    wakeup: Arc<Notify>,
    events: broadcast::Sender<JobEvent>,
    runner: JobRunner,
    max_concurrent_jobs: usize,
    shutdown: AtomicBool,
}

/// Handle to a running pipeline. Dropping it stops the scheduler once
/// in-flight jobs finish.
pub struct IngestPipeline {
    inner: Arc<PipelineInner>,
}

impl IngestPipeline {
    pub fn start(
        engine: Arc<dyn TranscodeEngine>,
        store: Arc<dyn ObjectStore>,
        status: Arc<dyn StatusPublisher>,
        options: WorkerOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let runner = JobRunner {
            stage: ObjectStage::new(&options.scratch_dir, store),
            engine,
            status,
            retry: options.retry,
            retry_sleep_cap: options.retry_sleep_cap,
        };
        let inner = Arc::new(PipelineInner {
            state: Mutex::new(QueueState::default()),
            wakeup: Arc::new(Notify::new()),
            events,
            runner,
            max_concurrent_jobs: options.max_concurrent_jobs,
            shutdown: AtomicBool::new(false),
        });
        tokio::spawn(scheduler_loop(Arc::downgrade(&inner)));
        Self { inner }
    }

    /// Enqueues a job and returns immediately.
    pub async fn submit(&self, job: ProcessingJob) {
        {
            let mut state = self.inner.state.lock().await;
            state.queued.push_back(job);
        }
        self.inner.wakeup.notify_one();
    }

    /// Subscribes to job completion events. Slow subscribers may miss
    /// events; this channel is for observation, not control flow.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub async fn queue_depth(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.queued.len() + state.running
    }
}

impl Drop for IngestPipeline {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wakeup.notify_one();
    }
}

async fn scheduler_loop(inner: Weak<PipelineInner>) {
    loop {
        let Some(pipeline) = inner.upgrade() else {
            return;
        };
        if pipeline.shutdown.load(Ordering::SeqCst) {
            debug!("pipeline handle dropped, scheduler exiting");
            return;
        }
        dispatch_ready(&pipeline).await;
        let wakeup = Arc::clone(&pipeline.wakeup);
        drop(pipeline);
        wakeup.notified().await;
    }
}

/// Starts every queued job that is currently eligible: capacity left
/// and no job for the same asset already running.
async fn dispatch_ready(inner: &Arc<PipelineInner>) {
    loop {
        let job = {
            let mut state = inner.state.lock().await;
            if state.running >= inner.max_concurrent_jobs {
                None
            } else {
                let next = state
                    .queued
                    .iter()
                    .position(|job| !state.in_flight.contains(&job.asset_id));
                next.and_then(|index| state.queued.remove(index)).map(|job| {
                    state.in_flight.insert(job.asset_id.clone());
                    state.running += 1;
                    job
                })
            }
        };
        let Some(job) = job else { return };

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let event = inner.runner.run_job(&job).await;
            {
                let mut state = inner.state.lock().await;
                state.in_flight.remove(&job.asset_id);
                state.running -= 1;
            }
            let _ = inner.events.send(event);
            inner.wakeup.notify_one();
        });
    }
}

struct JobRunner {
    stage: ObjectStage,
    engine: Arc<dyn TranscodeEngine>,
    status: Arc<dyn StatusPublisher>,
    retry: RetryPolicy,
    retry_sleep_cap: Duration,
}

impl JobRunner {
    async fn run_job(&self, job: &ProcessingJob) -> JobEvent {
        info!(asset_id = %job.asset_id, owner_id = %job.owner_id, "job started");
        match self.execute(job).await {
            Ok(report) => {
                info!(
                    asset_id = %report.asset_id,
                    published = report.published_count(),
                    planned = report.planned.len(),
                    "job completed"
                );
                JobEvent::Completed(report)
            }
            Err(err) => {
                error!(asset_id = %job.asset_id, error = %err, "job failed");
                JobEvent::Failed {
                    asset_id: job.asset_id.clone(),
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn execute(&self, job: &ProcessingJob) -> PipelineResult<JobReport> {
        self.status
            .set_processing_status(&job.asset_id, ProcessingState::Processing)
            .await?;

        let prepare = || async { self.stage.prepare(job).await };
        let workspace = self.retry_operation("download", prepare).await?;

        let result = self.run_stages(job, &workspace).await;
        self.stage.cleanup(&workspace).await;
        result
    }

    async fn run_stages(
        &self,
        job: &ProcessingJob,
        workspace: &JobWorkspace,
    ) -> PipelineResult<JobReport> {
        let probe = self.engine.probe(&workspace.source_file).await?;
        let planned = plan_renditions(probe.height, &job.target_tiers);
        if planned.is_empty() {
            warn!(
                asset_id = %job.asset_id,
                source_height = probe.height,
                "source below smallest tier, publishing empty manifest"
            );
        }

        let attempts = planned
            .iter()
            .map(|tier| self.process_tier(job, workspace, *tier));
        let renditions: Vec<RenditionResult> = join_all(attempts).await;

        if !planned.is_empty() && renditions.iter().all(|r| !r.succeeded()) {
            return Err(PipelineError::AllTiersFailed {
                asset_id: job.asset_id.clone(),
                attempted: planned.len(),
            });
        }

        // Catalog order is preserved because renditions mirrors planned.
        let variants: Vec<MasterVariant> = renditions
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| MasterVariant::for_tier(r.tier))
            .collect();
        let manifest = render_master(&variants);
        let local_manifest = workspace.root.join(MASTER_PLAYLIST_NAME);
        tokio::fs::write(&local_manifest, manifest)
            .await
            .map_err(|source| PipelineError::Io {
                source,
                path: local_manifest.clone(),
            })?;
        let manifest_object = self
            .stage
            .upload_master(&master_index(&job.owner_id, &job.asset_id), &local_manifest)
            .await?;

        self.status
            .set_processing_status(&job.asset_id, ProcessingState::Done)
            .await?;
        self.stage.delete_source(job).await;

        Ok(JobReport {
            asset_id: job.asset_id.clone(),
            owner_id: job.owner_id.clone(),
            planned,
            renditions,
            manifest_object: Some(manifest_object),
            completed_at: Utc::now(),
        })
    }

    async fn process_tier(
        &self,
        job: &ProcessingJob,
        workspace: &JobWorkspace,
        tier: QualityTier,
    ) -> RenditionResult {
        let out_dir = workspace.rendition_dir(&tier);
        if let Err(err) = tokio::fs::create_dir_all(&out_dir).await {
            warn!(asset_id = %job.asset_id, tier = %tier, error = %err, "rendition dir creation failed");
            return RenditionResult {
                tier,
                outcome: RenditionOutcome::Failed {
                    reason: err.to_string(),
                },
            };
        }

        let encode = || async {
            self.engine
                .encode(&workspace.source_file, &tier, &out_dir)
                .await
        };
        if let Err(err) = self.retry_operation("transcode", encode).await {
            warn!(asset_id = %job.asset_id, tier = %tier, error = %err, "tier transcode failed");
            return RenditionResult {
                tier,
                outcome: RenditionOutcome::Failed {
                    reason: err.to_string(),
                },
            };
        }

        match self.stage.publish_rendition(job, &tier, &out_dir).await {
            Ok(remote_dir) => RenditionResult {
                tier,
                outcome: RenditionOutcome::Published { remote_dir },
            },
            Err(err) => {
                warn!(asset_id = %job.asset_id, tier = %tier, error = %err, "tier upload failed");
                RenditionResult {
                    tier,
                    outcome: RenditionOutcome::Failed {
                        reason: err.to_string(),
                    },
                }
            }
        }
    }

    async fn retry_operation<F, Fut, T, E>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= attempts => return Err(err),
                Err(err) => {
                    let delay = self.retry.compute_delay(attempt).min(self.retry_sleep_cap);
                    warn!(
                        attempt = attempt + 1,
                        wait = ?delay,
                        stage = label,
                        error = %err,
                        "retrying operation"
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBundle;
    use std::path::Path;

    #[test]
    fn worker_options_come_from_config_files() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let bundle = ConfigBundle::from_directory(dir).unwrap();
        let options = WorkerOptions::from_config(&bundle.reel, &bundle.pipeline).unwrap();
        assert_eq!(options.max_concurrent_jobs, 2);
        assert_eq!(options.retry.attempts, 2);
        assert_eq!(options.retry.delay_range, [2, 8]);
        assert_eq!(
            options.with_retry_sleep_cap(Duration::ZERO).retry_sleep_cap,
            Duration::ZERO
        );
    }
}

