//! Job model: identifiers, lifecycle state, retry and retention policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use variantforge_core::BatchId;

use crate::request::GenerateRequest;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Job lifecycle: `Queued → Active → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed
    Queued,
    /// Claimed by a worker
    Active,
    /// Finished successfully
    Completed,
    /// Failed; `retryable` jobs become claimable again once their backoff expires
    Failed { retryable: bool },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed { retryable: false }
        )
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Failed { retryable: true })
    }
}

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same wait every time
    Fixed,
    /// Doubles per attempt
    #[default]
    Exponential,
    /// Grows by `base_delay` per attempt
    Linear,
}

/// Attempt budget and backoff for a unit of work.
///
/// Used twice: for background generation jobs, and for handing a job to the
/// broker in the first place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for every computed wait.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Fraction (0.0..=1.0) by which a wait may stray from its nominal value.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// Single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Small, quick policy for handing work to the broker.
    pub fn dispatch() -> Self {
        Self {
            jitter: 0.0,
            ..Self::exponential(3, Duration::from_millis(50), Duration::from_millis(500))
        }
    }

    /// Wait before the attempt following attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let nominal = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };

        spread(nominal.min(self.max_delay), self.jitter, attempt)
    }

    /// `attempt` is the number of attempts already made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Deterministic jitter: the same attempt number always lands on the same
/// offset, so schedules are reproducible in tests.
fn spread(delay: Duration, jitter: f64, attempt: u32) -> Duration {
    let jitter = jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || delay.is_zero() {
        return delay;
    }

    // offset in [-1.0, 1.0)
    let phase = f64::from(attempt.wrapping_mul(2_654_435_761) % 1000) / 500.0 - 1.0;
    let factor = 1.0 + jitter * phase;
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay)
}

/// How long finished jobs stay visible for status polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Completed jobs beyond this count are discarded oldest-first.
    /// Terminally failed jobs are always kept for inspection.
    pub keep_completed: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_completed: 1_000,
        }
    }
}

/// Options handed to the broker with every job (`attempts`, `backoff`, `retention`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobOptions {
    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
}

/// A queued job as the broker sees it: an opaque JSON payload plus bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
    pub state: JobState,
    /// Attempts consumed from the retry budget.
    pub attempts_made: u32,
    /// Incremented on every claim; a worker may only settle the lease it holds.
    pub lease: u64,
    /// Times the job was put back after its worker went silent.
    pub stall_count: u32,
    pub progress: u8,
    pub return_value: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant (backoff).
    pub available_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Job {
    pub fn new(name: impl Into<String>, payload: serde_json::Value, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.into(),
            payload,
            options,
            state: JobState::Queued,
            attempts_made: 0,
            lease: 0,
            stall_count: 0,
            progress: 0,
            return_value: None,
            failed_reason: None,
            created_at: now,
            updated_at: now,
            available_at: None,
            started_at: None,
            heartbeat_at: None,
            finished_at: None,
            history: Vec::new(),
        }
    }

    /// Ready to be claimed at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state.is_claimable() && self.available_at.is_none_or(|at| now >= at)
    }

    pub fn mark_active(&mut self) {
        let now = Utc::now();
        self.state = JobState::Active;
        self.attempts_made += 1;
        self.lease += 1;
        self.progress = 0;
        self.started_at = Some(now);
        self.heartbeat_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, return_value: serde_json::Value) {
        let now = Utc::now();
        self.push_history(now, None);
        self.state = JobState::Completed;
        self.progress = 100;
        self.return_value = Some(return_value);
        self.failed_reason = None;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Retryable failures are re-queued with backoff until attempts run out.
    pub fn mark_failed(&mut self, error: String, retryable: bool) {
        let now = Utc::now();
        self.push_history(now, Some(error.clone()));
        self.failed_reason = Some(error);
        self.updated_at = now;

        if retryable && self.options.retry.should_retry(self.attempts_made) {
            let delay = self.options.retry.delay_for_attempt(self.attempts_made);
            self.available_at =
                Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.state = JobState::Failed { retryable: true };
        } else {
            self.state = JobState::Failed { retryable: false };
            self.finished_at = Some(now);
        }
    }

    /// Put a silent job back in line without consuming its retry budget.
    pub fn mark_stalled(&mut self) {
        let now = Utc::now();
        self.push_history(now, Some("job stalled".to_string()));
        self.stall_count += 1;
        self.attempts_made = self.attempts_made.saturating_sub(1);
        self.state = JobState::Queued;
        self.available_at = None;
        self.heartbeat_at = None;
        self.updated_at = now;
    }

    fn push_history(&mut self, now: DateTime<Utc>, error: Option<String>) {
        let started_at = self.started_at.unwrap_or(now);
        self.history.push(JobAttemptRecord {
            attempt: self.attempts_made,
            started_at,
            finished_at: now,
            success: error.is_none(),
            error,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            progress: self.progress,
            attempts_made: self.attempts_made,
            return_value: self.return_value.clone(),
            failed_reason: self.failed_reason.clone(),
        }
    }
}

/// Broker lookup result: `{state, progress, returnValue, failedReason}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub state: JobState,
    pub progress: u8,
    pub attempts_made: u32,
    pub return_value: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
}

/// Payload of a background generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub batch_id: BatchId,
    pub predicted: u64,
    pub request: GenerateRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with(policy: RetryPolicy) -> Job {
        Job::new(
            "test",
            serde_json::json!({}),
            JobOptions {
                retry: policy,
                ..Default::default()
            },
        )
    }

    #[test]
    fn doubling_backoff_stops_at_cap() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential(6, Duration::from_millis(250), Duration::from_secs(1))
        };

        let waits: Vec<u128> = (1..=5).map(|n| policy.delay_for_attempt(n).as_millis()).collect();
        assert_eq!(waits, vec![250, 500, 1000, 1000, 1000]);
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(1));
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
            ..RetryPolicy::exponential(4, Duration::from_millis(30), Duration::from_millis(75))
        };
        assert_eq!(linear.delay_for_attempt(2), Duration::from_millis(60));
        assert_eq!(linear.delay_for_attempt(3), Duration::from_millis(75));

        let fixed = RetryPolicy::fixed(4, Duration::from_millis(40));
        assert!((1..4).all(|n| fixed.delay_for_attempt(n) == Duration::from_millis(40)));
        assert_eq!(fixed.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_band_and_is_repeatable() {
        let policy = RetryPolicy::exponential(5, Duration::from_secs(2), Duration::from_secs(2));

        for attempt in 1..50 {
            let wait = policy.delay_for_attempt(attempt);
            assert!(wait >= Duration::from_millis(1790) && wait <= Duration::from_millis(2210));
            assert_eq!(wait, policy.delay_for_attempt(attempt));
        }
    }

    #[test]
    fn attempt_budget_includes_first_attempt() {
        let policy = RetryPolicy::dispatch();

        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn job_lifecycle() {
        let mut job = job_with(RetryPolicy::default());
        assert_eq!(job.state, JobState::Queued);
        assert!(job.is_ready(Utc::now()));

        job.mark_active();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempts_made, 1);
        assert!(!job.is_ready(Utc::now()));

        job.mark_completed(serde_json::json!({"ok": true}));
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.state.is_terminal());
        assert_eq!(job.history.len(), 1);
        assert!(job.history[0].success);
    }

    #[test]
    fn retryable_failure_backs_off_until_attempts_run_out() {
        let mut job = job_with(RetryPolicy::fixed(2, Duration::from_secs(30)));

        job.mark_active();
        job.mark_failed("error 1".to_string(), true);
        assert_eq!(job.state, JobState::Failed { retryable: true });
        assert!(job.available_at.is_some());
        assert!(!job.is_ready(Utc::now()));

        job.mark_active();
        job.mark_failed("error 2".to_string(), true);
        assert_eq!(job.state, JobState::Failed { retryable: false });
        assert_eq!(job.failed_reason.as_deref(), Some("error 2"));
        assert_eq!(job.history.len(), 2);
    }

    #[test]
    fn terminal_failure_skips_retries() {
        let mut job = job_with(RetryPolicy::default());
        job.mark_active();
        job.mark_failed("bad payload".to_string(), false);
        assert!(job.state.is_terminal());
    }

    #[test]
    fn stalled_job_is_requeued() {
        let mut job = job_with(RetryPolicy::default());
        job.mark_active();
        job.mark_stalled();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.stall_count, 1);
        assert_eq!(job.attempts_made, 0);
        assert!(job.is_ready(Utc::now()));

        job.mark_active();
        assert_eq!(job.lease, 2);
    }
}
