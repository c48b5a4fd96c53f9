//! Background job system for large generation batches.
//!
//! ## Design
//!
//! - Jobs carry an opaque JSON payload plus attempts/backoff/retention options
//! - Retry policy with exponential backoff; exhausted jobs are failed and kept
//! - Every claim hands out a lease; only the current lease holder may settle
//! - Silent jobs are requeued by a stall sweep a bounded number of times
//!
//! ## Components
//!
//! - `Job`: queued unit with lifecycle bookkeeping
//! - `JobQueue`: broker interface (in-memory implementation for tests/dev)
//! - `GenerationWorkerPool`: fixed-size pool running a `JobHandler`

pub mod queue;
pub mod types;
pub mod worker;

pub use queue::{InMemoryJobQueue, JobQueue, QueueError, QueueStats, StallReport};
pub use types::{
    BackoffStrategy, GenerationJob, Job, JobAttemptRecord, JobId, JobOptions, JobSnapshot,
    JobState, RetentionPolicy, RetryPolicy,
};
pub use worker::{
    GenerationWorkerPool, JobContext, JobHandler, JobResult, PoolStats, Settlement,
    WorkerPoolHandle,
};
