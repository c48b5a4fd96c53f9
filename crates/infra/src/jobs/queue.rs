//! Job queue (broker) abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use super::types::{Job, JobId, JobOptions, JobSnapshot, JobState};

/// Broker interface consumed by the dispatcher and the worker pool.
///
/// Settling calls (`heartbeat`, `update_progress`, `complete`, `fail`) carry
/// the lease handed out by `claim_next`; a stale lease is rejected with
/// [`QueueError::LeaseLost`].
pub trait JobQueue: Send + Sync {
    /// Enqueue a new job.
    fn add(&self, name: &str, payload: serde_json::Value, options: JobOptions)
        -> Result<JobId, QueueError>;

    /// Look up a job's externally visible state.
    fn get(&self, job_id: JobId) -> Result<Option<JobSnapshot>, QueueError>;

    /// Claim the oldest job that is ready to run.
    fn claim_next(&self) -> Result<Option<Job>, QueueError>;

    fn heartbeat(&self, job_id: JobId, lease: u64) -> Result<(), QueueError>;

    fn update_progress(&self, job_id: JobId, lease: u64, progress: u8) -> Result<(), QueueError>;

    fn complete(
        &self,
        job_id: JobId,
        lease: u64,
        return_value: serde_json::Value,
    ) -> Result<JobState, QueueError>;

    /// Returns the resulting state: retryable failures come back as
    /// `Failed { retryable: true }` until the retry budget is spent.
    fn fail(
        &self,
        job_id: JobId,
        lease: u64,
        reason: String,
        retryable: bool,
    ) -> Result<JobState, QueueError>;

    /// Requeue active jobs whose last heartbeat is older than `stall_window`.
    /// Jobs that already stalled `max_stall_requeues` times fail terminally.
    fn requeue_stalled(
        &self,
        stall_window: Duration,
        max_stall_requeues: u32,
    ) -> Result<StallReport, QueueError>;

    fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("lease {lease} on job {job_id} is no longer held")]
    LeaseLost { job_id: JobId, lease: u64 },
    #[error("storage error: {0}")]
    Storage(String),
}

impl QueueError {
    /// Worth retrying the same call after a short delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

/// Outcome of a stall sweep.
#[derive(Debug, Clone, Default)]
pub struct StallReport {
    pub requeued: Vec<JobId>,
    /// Jobs that exceeded the stall limit, already marked failed.
    pub failed: Vec<Job>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
}

/// In-memory job queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Full job record, including attempt history.
    pub fn job(&self, job_id: JobId) -> Option<Job> {
        self.jobs.read().ok()?.get(&job_id).cloned()
    }

    fn with_leased<T>(
        &self,
        job_id: JobId,
        lease: u64,
        f: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, QueueError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let job = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        if job.state != JobState::Active || job.lease != lease {
            return Err(QueueError::LeaseLost { job_id, lease });
        }
        Ok(f(job))
    }

    fn enforce_retention(jobs: &mut HashMap<JobId, Job>, keep_completed: usize) {
        let mut completed: Vec<_> = jobs
            .values()
            .filter(|j| j.state == JobState::Completed)
            .map(|j| (j.finished_at, j.id))
            .collect();

        if completed.len() <= keep_completed {
            return;
        }

        completed.sort();
        let excess = completed.len() - keep_completed;
        for (_, id) in completed.into_iter().take(excess) {
            jobs.remove(&id);
        }
    }
}

fn poisoned<T>(_: T) -> QueueError {
    QueueError::Storage("job queue lock poisoned".to_string())
}

impl JobQueue for InMemoryJobQueue {
    fn add(
        &self,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId, QueueError> {
        let job = Job::new(name, payload, options);
        let id = job.id;
        self.jobs.write().map_err(poisoned)?.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobSnapshot>, QueueError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.get(&job_id).map(Job::snapshot))
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let now = Utc::now();

        // FIFO among ready jobs
        let next = jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| j.created_at)
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_active();
                job.clone()
            })
        }))
    }

    fn heartbeat(&self, job_id: JobId, lease: u64) -> Result<(), QueueError> {
        self.with_leased(job_id, lease, |job| {
            job.heartbeat_at = Some(Utc::now());
        })
    }

    fn update_progress(&self, job_id: JobId, lease: u64, progress: u8) -> Result<(), QueueError> {
        self.with_leased(job_id, lease, |job| {
            let now = Utc::now();
            job.progress = progress.min(100);
            job.heartbeat_at = Some(now);
            job.updated_at = now;
        })
    }

    fn complete(
        &self,
        job_id: JobId,
        lease: u64,
        return_value: serde_json::Value,
    ) -> Result<JobState, QueueError> {
        let (state, keep_completed) = self.with_leased(job_id, lease, |job| {
            job.mark_completed(return_value);
            (job.state, job.options.retention.keep_completed)
        })?;

        let mut jobs = self.jobs.write().map_err(poisoned)?;
        Self::enforce_retention(&mut jobs, keep_completed);
        Ok(state)
    }

    fn fail(
        &self,
        job_id: JobId,
        lease: u64,
        reason: String,
        retryable: bool,
    ) -> Result<JobState, QueueError> {
        self.with_leased(job_id, lease, |job| {
            job.mark_failed(reason, retryable);
            job.state
        })
    }

    fn requeue_stalled(
        &self,
        stall_window: Duration,
        max_stall_requeues: u32,
    ) -> Result<StallReport, QueueError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let cutoff = Utc::now() - chrono::Duration::from_std(stall_window).unwrap_or_default();
        let mut report = StallReport::default();

        for job in jobs.values_mut() {
            let silent = job.state == JobState::Active
                && job.heartbeat_at.is_none_or(|beat| beat <= cutoff);
            if !silent {
                continue;
            }

            if job.stall_count < max_stall_requeues {
                job.mark_stalled();
                report.requeued.push(job.id);
            } else {
                job.mark_failed(
                    format!("job stalled more than {max_stall_requeues} times"),
                    false,
                );
                report.failed.push(job.clone());
            }
        }

        Ok(report)
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut stats = QueueStats::default();

        for job in jobs.values() {
            match job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed { retryable: true } => stats.retrying += 1,
                JobState::Failed { retryable: false } => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    fn add(
        &self,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId, QueueError> {
        (**self).add(name, payload, options)
    }

    fn get(&self, job_id: JobId) -> Result<Option<JobSnapshot>, QueueError> {
        (**self).get(job_id)
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        (**self).claim_next()
    }

    fn heartbeat(&self, job_id: JobId, lease: u64) -> Result<(), QueueError> {
        (**self).heartbeat(job_id, lease)
    }

    fn update_progress(&self, job_id: JobId, lease: u64, progress: u8) -> Result<(), QueueError> {
        (**self).update_progress(job_id, lease, progress)
    }

    fn complete(
        &self,
        job_id: JobId,
        lease: u64,
        return_value: serde_json::Value,
    ) -> Result<JobState, QueueError> {
        (**self).complete(job_id, lease, return_value)
    }

    fn fail(
        &self,
        job_id: JobId,
        lease: u64,
        reason: String,
        retryable: bool,
    ) -> Result<JobState, QueueError> {
        (**self).fail(job_id, lease, reason, retryable)
    }

    fn requeue_stalled(
        &self,
        stall_window: Duration,
        max_stall_requeues: u32,
    ) -> Result<StallReport, QueueError> {
        (**self).requeue_stalled(stall_window, max_stall_requeues)
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{RetentionPolicy, RetryPolicy};

    fn options(retry: RetryPolicy) -> JobOptions {
        JobOptions {
            retry,
            ..Default::default()
        }
    }

    #[test]
    fn add_and_claim_fifo() {
        let queue = InMemoryJobQueue::new();
        let first = queue.add("gen", serde_json::json!({"n": 1}), JobOptions::default()).unwrap();
        let second = queue.add("gen", serde_json::json!({"n": 2}), JobOptions::default()).unwrap();

        let claimed = queue.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.lease, 1);

        assert_eq!(queue.claim_next().unwrap().unwrap().id, second);
        assert!(queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn lookup_reports_progress_and_result() {
        let queue = InMemoryJobQueue::new();
        let id = queue.add("gen", serde_json::json!({}), JobOptions::default()).unwrap();
        assert_eq!(queue.get(id).unwrap().unwrap().state, JobState::Queued);

        let job = queue.claim_next().unwrap().unwrap();
        queue.update_progress(id, job.lease, 50).unwrap();
        assert_eq!(queue.get(id).unwrap().unwrap().progress, 50);

        queue
            .complete(id, job.lease, serde_json::json!({"generated": 3}))
            .unwrap();
        let snapshot = queue.get(id).unwrap().unwrap();
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.progress, 100);
        assert_eq!(snapshot.return_value, Some(serde_json::json!({"generated": 3})));
    }

    #[test]
    fn retryable_failures_exhaust_then_stay_visible() {
        let queue = InMemoryJobQueue::new();
        let id = queue
            .add("gen", serde_json::json!({}), options(RetryPolicy::fixed(2, Duration::ZERO)))
            .unwrap();

        let job = queue.claim_next().unwrap().unwrap();
        let state = queue.fail(id, job.lease, "boom".into(), true).unwrap();
        assert_eq!(state, JobState::Failed { retryable: true });

        let job = queue.claim_next().unwrap().unwrap();
        assert_eq!(job.attempts_made, 2);
        let state = queue.fail(id, job.lease, "boom again".into(), true).unwrap();
        assert_eq!(state, JobState::Failed { retryable: false });

        assert!(queue.claim_next().unwrap().is_none());
        let snapshot = queue.get(id).unwrap().unwrap();
        assert_eq!(snapshot.failed_reason.as_deref(), Some("boom again"));
        assert_eq!(queue.stats().unwrap().failed, 1);
    }

    #[test]
    fn backoff_delays_the_next_claim() {
        let queue = InMemoryJobQueue::new();
        let id = queue
            .add(
                "gen",
                serde_json::json!({}),
                options(RetryPolicy::fixed(3, Duration::from_secs(60))),
            )
            .unwrap();

        let job = queue.claim_next().unwrap().unwrap();
        queue.fail(id, job.lease, "transient".into(), true).unwrap();
        assert!(queue.claim_next().unwrap().is_none());
        assert_eq!(queue.stats().unwrap().retrying, 1);
    }

    #[test]
    fn stale_lease_cannot_settle() {
        let queue = InMemoryJobQueue::new();
        let id = queue.add("gen", serde_json::json!({}), JobOptions::default()).unwrap();

        let stale = queue.claim_next().unwrap().unwrap();
        let report = queue.requeue_stalled(Duration::ZERO, 2).unwrap();
        assert_eq!(report.requeued, vec![id]);

        let fresh = queue.claim_next().unwrap().unwrap();
        assert!(matches!(
            queue.complete(id, stale.lease, serde_json::json!(null)),
            Err(QueueError::LeaseLost { .. })
        ));
        assert!(queue.complete(id, fresh.lease, serde_json::json!(null)).is_ok());
    }

    #[test]
    fn stall_requeues_are_bounded() {
        let queue = InMemoryJobQueue::new();
        let id = queue.add("gen", serde_json::json!({}), JobOptions::default()).unwrap();

        for _ in 0..2 {
            queue.claim_next().unwrap().unwrap();
            let report = queue.requeue_stalled(Duration::ZERO, 2).unwrap();
            assert_eq!(report.requeued.len(), 1);
        }

        queue.claim_next().unwrap().unwrap();
        let report = queue.requeue_stalled(Duration::ZERO, 2).unwrap();
        assert!(report.requeued.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            queue.get(id).unwrap().unwrap().state,
            JobState::Failed { retryable: false }
        );
    }

    #[test]
    fn heartbeats_keep_jobs_alive() {
        let queue = InMemoryJobQueue::new();
        let id = queue.add("gen", serde_json::json!({}), JobOptions::default()).unwrap();
        let job = queue.claim_next().unwrap().unwrap();

        queue.heartbeat(id, job.lease).unwrap();
        let report = queue.requeue_stalled(Duration::from_secs(60), 2).unwrap();
        assert!(report.requeued.is_empty());
        assert_eq!(queue.stats().unwrap().active, 1);
    }

    #[test]
    fn retention_discards_oldest_completed_only() {
        let queue = InMemoryJobQueue::new();
        let opts = JobOptions {
            retention: RetentionPolicy { keep_completed: 1 },
            retry: RetryPolicy::no_retry(),
        };

        let failed = queue.add("gen", serde_json::json!({}), opts.clone()).unwrap();
        let job = queue.claim_next().unwrap().unwrap();
        queue.fail(failed, job.lease, "fatal".into(), false).unwrap();

        let mut completed = Vec::new();
        for _ in 0..3 {
            let id = queue.add("gen", serde_json::json!({}), opts.clone()).unwrap();
            let job = queue.claim_next().unwrap().unwrap();
            queue.complete(id, job.lease, serde_json::json!({})).unwrap();
            completed.push(id);
        }

        assert!(queue.get(failed).unwrap().is_some());
        assert!(queue.get(completed[0]).unwrap().is_none());
        assert!(queue.get(completed[1]).unwrap().is_none());
        assert!(queue.get(completed[2]).unwrap().is_some());
    }
}
