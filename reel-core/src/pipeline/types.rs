use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{QualityTier, DEFAULT_CATALOG};
use crate::config::RetrySection;
use crate::error::ConfigError;

/// One unit of work: transcode a single uploaded asset into every tier
/// its source resolution supports.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingJob {
    pub asset_id: String,
    pub owner_id: String,
    /// `<bucket>/<object>` of the uploaded source file.
    pub source_object: String,
    pub target_tiers: Vec<QualityTier>,
}

impl ProcessingJob {
    pub fn new(
        asset_id: impl Into<String>,
        owner_id: impl Into<String>,
        source_object: impl Into<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            owner_id: owner_id.into(),
            source_object: source_object.into(),
            target_tiers: DEFAULT_CATALOG.to_vec(),
        }
    }

    pub fn with_tiers(mut self, tiers: Vec<QualityTier>) -> Self {
        self.target_tiers = tiers;
        self
    }
}

pub fn generate_asset_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct RenditionResult {
    pub tier: QualityTier,
    pub outcome: RenditionOutcome,
}

impl RenditionResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RenditionOutcome::Published { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenditionOutcome {
    Published { remote_dir: String },
    Failed { reason: String },
}

/// Everything a completed job produced, published on the event channel.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub asset_id: String,
    pub owner_id: String,
    pub planned: Vec<QualityTier>,
    pub renditions: Vec<RenditionResult>,
    pub manifest_object: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl JobReport {
    pub fn published_count(&self) -> usize {
        self.renditions.iter().filter(|r| r.succeeded()).count()
    }
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Completed(JobReport),
    Failed { asset_id: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_range: [u32; 2],
}

impl RetryPolicy {
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        if self.attempts <= 1 {
            return Duration::from_secs(self.delay_range[0] as u64);
        }
        let min = self.delay_range[0] as f64;
        let max = self.delay_range[1] as f64;
        let ratio = (attempt as f64) / ((self.attempts - 1) as f64);
        let seconds = min + (max - min) * ratio;
        Duration::from_secs(seconds.round() as u64)
    }
}

impl TryFrom<&RetrySection> for RetryPolicy {
    type Error = ConfigError;

    fn try_from(section: &RetrySection) -> Result<Self, Self::Error> {
        if section.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            attempts: section.max_attempts,
            delay_range: section.delay_seconds,
        })
    }
}
