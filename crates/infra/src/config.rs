//! Generation configuration: thresholds, ceilings and worker settings.
//!
//! Built once per process and injected into the orchestrator. Defaults can be
//! overlaid from `VARIANTFORGE_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jobs::{BackoffStrategy, JobOptions, RetentionPolicy, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Predictions up to and including this run inline.
    pub inline_threshold: u64,
    /// Predictions above this are rejected outright.
    pub hard_ceiling: u64,
    /// When the broker is unavailable, predictions up to this still run
    /// inline. `None` disables the fallback.
    pub fallback_ceiling: Option<u64>,
    /// Combinations listed by a preview.
    pub preview_limit: usize,
    /// Retries for handing a job to the broker.
    pub dispatch_retry: RetryPolicy,
    /// Options attached to every background job.
    pub job: JobOptions,
    pub worker: WorkerConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 50,
            hard_ceiling: 5_000,
            fallback_ceiling: None,
            preview_limit: 100,
            dispatch_retry: RetryPolicy::dispatch(),
            job: JobOptions {
                retry: RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(60)),
                retention: RetentionPolicy::default(),
            },
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: String,
    /// Worker threads in the pool.
    pub concurrency: usize,
    /// Wall-clock budget of one execution.
    pub job_timeout: Duration,
    /// An active job without a heartbeat for this long is considered stalled.
    pub stall_window: Duration,
    pub max_stall_requeues: u32,
    /// Sleep between empty polls.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "variant-generation".to_string(),
            concurrency: 4,
            job_timeout: Duration::from_secs(300),
            stall_window: Duration::from_secs(60),
            max_stall_requeues: 2,
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl GenerationConfig {
    /// Defaults overlaid with `VARIANTFORGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each known key.
    /// Unparsable values are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        overlay(&read, "VARIANTFORGE_INLINE_THRESHOLD", &mut config.inline_threshold);
        overlay(&read, "VARIANTFORGE_HARD_CEILING", &mut config.hard_ceiling);
        overlay(&read, "VARIANTFORGE_PREVIEW_LIMIT", &mut config.preview_limit);

        if let Some(raw) = read("VARIANTFORGE_FALLBACK_CEILING") {
            match raw.as_str() {
                "none" | "off" => config.fallback_ceiling = None,
                _ => match raw.parse::<u64>() {
                    Ok(v) => config.fallback_ceiling = Some(v),
                    Err(_) => warn_invalid("VARIANTFORGE_FALLBACK_CEILING", &raw),
                },
            }
        }

        overlay(&read, "VARIANTFORGE_JOB_ATTEMPTS", &mut config.job.retry.max_attempts);
        overlay_millis(&read, "VARIANTFORGE_JOB_BACKOFF_MS", &mut config.job.retry.base_delay);
        overlay_millis(&read, "VARIANTFORGE_JOB_BACKOFF_MAX_MS", &mut config.job.retry.max_delay);
        if let Some(raw) = read("VARIANTFORGE_JOB_BACKOFF_STRATEGY") {
            match raw.as_str() {
                "fixed" => config.job.retry.strategy = BackoffStrategy::Fixed,
                "exponential" => config.job.retry.strategy = BackoffStrategy::Exponential,
                "linear" => config.job.retry.strategy = BackoffStrategy::Linear,
                _ => warn_invalid("VARIANTFORGE_JOB_BACKOFF_STRATEGY", &raw),
            }
        }
        overlay(&read, "VARIANTFORGE_KEEP_COMPLETED", &mut config.job.retention.keep_completed);

        overlay(&read, "VARIANTFORGE_DISPATCH_ATTEMPTS", &mut config.dispatch_retry.max_attempts);
        overlay_millis(&read, "VARIANTFORGE_DISPATCH_BACKOFF_MS", &mut config.dispatch_retry.base_delay);

        overlay(&read, "VARIANTFORGE_WORKER_CONCURRENCY", &mut config.worker.concurrency);
        overlay_secs(&read, "VARIANTFORGE_JOB_TIMEOUT_SECS", &mut config.worker.job_timeout);
        overlay_secs(&read, "VARIANTFORGE_STALL_WINDOW_SECS", &mut config.worker.stall_window);
        overlay(&read, "VARIANTFORGE_MAX_STALL_REQUEUES", &mut config.worker.max_stall_requeues);
        overlay_millis(&read, "VARIANTFORGE_POLL_INTERVAL_MS", &mut config.worker.poll_interval);

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inline_threshold > self.hard_ceiling {
            return Err(ConfigError::Invalid(format!(
                "inline_threshold ({}) exceeds hard_ceiling ({})",
                self.inline_threshold, self.hard_ceiling
            )));
        }
        if let Some(fallback) = self.fallback_ceiling {
            if fallback > self.hard_ceiling {
                return Err(ConfigError::Invalid(format!(
                    "fallback_ceiling ({fallback}) exceeds hard_ceiling ({})",
                    self.hard_ceiling
                )));
            }
        }
        if self.dispatch_retry.max_attempts == 0 || self.job.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("attempt counts must be at least 1".into()));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid("worker concurrency must be at least 1".into()));
        }
        if self.worker.job_timeout.is_zero() {
            return Err(ConfigError::Invalid("job_timeout must be positive".into()));
        }
        Ok(())
    }
}

fn warn_invalid(key: &str, raw: &str) {
    tracing::warn!(key, value = raw, "ignoring unparsable configuration value");
}

fn overlay<T: FromStr>(read: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = read(key) {
        match raw.parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn_invalid(key, &raw),
        }
    }
}

fn overlay_millis(read: &impl Fn(&str) -> Option<String>, key: &str, target: &mut Duration) {
    let mut ms = target.as_millis() as u64;
    overlay(read, key, &mut ms);
    *target = Duration::from_millis(ms);
}

fn overlay_secs(read: &impl Fn(&str) -> Option<String>, key: &str, target: &mut Duration) {
    let mut secs = target.as_secs();
    overlay(read, key, &mut secs);
    *target = Duration::from_secs(secs);
}
