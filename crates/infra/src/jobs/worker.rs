//! Fixed-size worker pool with timeout, progress, heartbeat and stall handling.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::queue::{JobQueue, QueueError};
use super::types::{Job, JobId, JobState};
use crate::config::WorkerConfig;
use crate::error::GenerationError;
use crate::persistence::ExecutionGuard;

/// Outcome reported by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Success(serde_json::Value),
    /// Failed, may succeed on another attempt.
    Retryable(String),
    /// Failed, retrying cannot help.
    Terminal(String),
}

/// What the queue made of a job after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Completed(serde_json::Value),
    /// Will be attempted again after its backoff.
    Retrying { reason: String },
    /// Terminal: retries exhausted, non-retryable error, or stalled too often.
    Failed { reason: String },
}

impl Settlement {
    pub fn is_final(&self) -> bool {
        !matches!(self, Settlement::Retrying { .. })
    }
}

pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job, ctx: &JobContext<'_>) -> JobResult;

    /// Called once per attempt after the queue recorded its outcome, and for
    /// jobs failed by the stall sweep.
    fn on_settled(&self, _job: &Job, _settlement: &Settlement) {}
}

impl<H> JobHandler for Arc<H>
where
    H: JobHandler + ?Sized,
{
    fn handle(&self, job: &Job, ctx: &JobContext<'_>) -> JobResult {
        (**self).handle(job, ctx)
    }

    fn on_settled(&self, job: &Job, settlement: &Settlement) {
        (**self).on_settled(job, settlement)
    }
}

/// Per-attempt execution context handed to a handler.
///
/// Acts as the [`ExecutionGuard`] of background persistence: each checkpoint
/// enforces the deadline, heartbeats the lease and reports the midpoint.
pub struct JobContext<'a> {
    queue: &'a dyn JobQueue,
    job_id: JobId,
    lease: u64,
    timeout: Duration,
    deadline: Instant,
    midpoint_reported: Cell<bool>,
}

impl<'a> JobContext<'a> {
    pub fn new(queue: &'a dyn JobQueue, job: &Job, timeout: Duration) -> Self {
        Self {
            queue,
            job_id: job.id,
            lease: job.lease,
            timeout,
            deadline: Instant::now() + timeout,
            midpoint_reported: Cell::new(false),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn report_progress(&self, progress: u8) -> Result<(), GenerationError> {
        self.queue
            .update_progress(self.job_id, self.lease, progress)
            .map_err(|e| self.lease_error(e))
    }

    fn lease_error(&self, err: QueueError) -> GenerationError {
        match err {
            QueueError::LeaseLost { .. } => {
                GenerationError::Conflict(format!("job {} was reclaimed by another worker", self.job_id))
            }
            other => other.into(),
        }
    }
}

impl ExecutionGuard for JobContext<'_> {
    fn checkpoint(&self, processed: u64, total: u64) -> Result<(), GenerationError> {
        if self.is_expired() {
            return Err(GenerationError::Timeout(self.timeout));
        }

        if !self.midpoint_reported.get() && total > 0 && processed.saturating_mul(2) >= total {
            self.midpoint_reported.set(true);
            return self.report_progress(50);
        }

        match self.queue.heartbeat(self.job_id, self.lease) {
            Ok(()) => Ok(()),
            Err(err @ QueueError::LeaseLost { .. }) => Err(self.lease_error(err)),
            Err(err) => {
                // a missed heartbeat only risks a stall requeue
                warn!(job_id = %self.job_id, error = %err, "heartbeat failed");
                Ok(())
            }
        }
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub stalls_requeued: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<PoolStats>>,
    started: Instant,
}

impl WorkerPoolHandle {
    /// Request graceful shutdown; running jobs finish their current attempt.
    pub fn shutdown(mut self) {
        self.stop();
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
    }
}

impl Drop for WorkerPoolHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background worker pool: `concurrency` workers plus one stall reaper.
pub struct GenerationWorkerPool;

impl GenerationWorkerPool {
    pub fn spawn(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> std::io::Result<WorkerPoolHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(PoolStats::default()));
        let mut handle = WorkerPoolHandle {
            shutdown: shutdown.clone(),
            joins: Vec::with_capacity(config.concurrency + 1),
            stats: stats.clone(),
            started: Instant::now(),
        };

        for index in 0..config.concurrency.max(1) {
            let queue = queue.clone();
            let handler = handler.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            let stats = stats.clone();

            let join = thread::Builder::new()
                .name(format!("{}-{index}", config.name))
                .spawn(move || worker_loop(queue.as_ref(), handler.as_ref(), &config, &shutdown, &stats))?;
            handle.joins.push(join);
        }

        let reaper = {
            let config = config.clone();
            thread::Builder::new()
                .name(format!("{}-reaper", config.name))
                .spawn(move || reaper_loop(queue.as_ref(), handler.as_ref(), &config, &shutdown, &stats))?
        };
        handle.joins.push(reaper);

        info!(pool = %config.name, concurrency = config.concurrency, "worker pool started");
        Ok(handle)
    }

    /// Claim and run a single job on the calling thread.
    pub fn run_once(
        queue: &dyn JobQueue,
        handler: &dyn JobHandler,
        config: &WorkerConfig,
    ) -> Result<Option<Settlement>, QueueError> {
        match queue.claim_next()? {
            Some(job) => execute_job(queue, handler, config, job),
            None => Ok(None),
        }
    }

    /// Run the stall sweep once on the calling thread.
    pub fn reap_once(
        queue: &dyn JobQueue,
        handler: &dyn JobHandler,
        config: &WorkerConfig,
    ) -> Result<usize, QueueError> {
        let report = queue.requeue_stalled(config.stall_window, config.max_stall_requeues)?;

        for job_id in &report.requeued {
            warn!(pool = %config.name, job_id = %job_id, "stalled job requeued");
        }
        for job in &report.failed {
            let reason = job.failed_reason.clone().unwrap_or_else(|| "job stalled".to_string());
            error!(pool = %config.name, job_id = %job.id, reason = %reason, "stalled job failed");
            handler.on_settled(job, &Settlement::Failed { reason });
        }

        Ok(report.requeued.len())
    }
}

fn worker_loop(
    queue: &dyn JobQueue,
    handler: &dyn JobHandler,
    config: &WorkerConfig,
    shutdown: &AtomicBool,
    stats: &Mutex<PoolStats>,
) {
    debug!(pool = %config.name, "worker started");

    while !shutdown.load(Ordering::SeqCst) {
        let job = match queue.claim_next() {
            Ok(Some(job)) => job,
            Ok(None) => {
                thread::sleep(config.poll_interval);
                continue;
            }
            Err(e) => {
                error!(pool = %config.name, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
                continue;
            }
        };

        update_stats(stats, |s| s.current_running += 1);
        let job_id = job.id;
        let outcome = execute_job(queue, handler, config, job);

        update_stats(stats, |s| {
            s.current_running = s.current_running.saturating_sub(1);
            s.jobs_processed += 1;
            match &outcome {
                Ok(Some(Settlement::Completed(_))) => s.jobs_succeeded += 1,
                Ok(Some(Settlement::Retrying { .. })) => s.jobs_retried += 1,
                Ok(Some(Settlement::Failed { .. })) => s.jobs_failed += 1,
                Ok(None) | Err(_) => {}
            }
        });

        if let Err(e) = outcome {
            error!(pool = %config.name, job_id = %job_id, error = %e, "failed to settle job");
        }
    }

    debug!(pool = %config.name, "worker stopped");
}

fn reaper_loop(
    queue: &dyn JobQueue,
    handler: &dyn JobHandler,
    config: &WorkerConfig,
    shutdown: &AtomicBool,
    stats: &Mutex<PoolStats>,
) {
    let sweep_every = (config.stall_window / 2).max(config.poll_interval);
    let mut last_sweep = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(config.poll_interval);
        if last_sweep.elapsed() < sweep_every {
            continue;
        }
        last_sweep = Instant::now();

        match GenerationWorkerPool::reap_once(queue, handler, config) {
            Ok(requeued) => update_stats(stats, |s| s.stalls_requeued += requeued as u64),
            Err(e) => error!(pool = %config.name, error = %e, "stall sweep failed"),
        }
    }
}

fn execute_job(
    queue: &dyn JobQueue,
    handler: &dyn JobHandler,
    config: &WorkerConfig,
    job: Job,
) -> Result<Option<Settlement>, QueueError> {
    debug!(
        pool = %config.name,
        job_id = %job.id,
        attempt = job.attempts_made,
        "claimed job"
    );

    let ctx = JobContext::new(queue, &job, config.job_timeout);
    let started = Instant::now();
    if let Err(e) = ctx.report_progress(0) {
        warn!(job_id = %job.id, error = %e, "could not report start");
    }

    let result = handler.handle(&job, &ctx);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let settled = match result {
        JobResult::Success(value) => queue
            .complete(job.id, job.lease, value.clone())
            .map(|_| Settlement::Completed(value)),
        JobResult::Retryable(reason) => queue
            .fail(job.id, job.lease, reason.clone(), true)
            .map(|state| match state {
                JobState::Failed { retryable: true } => Settlement::Retrying { reason },
                _ => Settlement::Failed { reason },
            }),
        JobResult::Terminal(reason) => queue
            .fail(job.id, job.lease, reason.clone(), false)
            .map(|_| Settlement::Failed { reason }),
    };

    let settlement = match settled {
        Ok(settlement) => settlement,
        Err(QueueError::LeaseLost { .. }) => {
            // the stall sweep handed this job to someone else
            warn!(job_id = %job.id, lease = job.lease, "lease lost; outcome discarded");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    match &settlement {
        Settlement::Completed(_) => {
            info!(job_id = %job.id, elapsed_ms, "job completed")
        }
        Settlement::Retrying { reason } => {
            warn!(job_id = %job.id, attempt = job.attempts_made, reason = %reason, "job failed; will retry")
        }
        Settlement::Failed { reason } => {
            error!(job_id = %job.id, attempt = job.attempts_made, reason = %reason, "job failed")
        }
    }

    handler.on_settled(&job, &settlement);
    Ok(Some(settlement))
}

fn update_stats(stats: &Mutex<PoolStats>, f: impl FnOnce(&mut PoolStats)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}
