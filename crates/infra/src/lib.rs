//! Infrastructure layer: stores, job queue and workers, audit, orchestration.

pub mod audit;
pub mod batch;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod persistence;
pub mod request;
pub mod stores;


pub use audit::{AuditDraft, AuditRecorder};
pub use batch::{BatchExecutor, BatchRun};
pub use collaborators::{
    AcceptAllScope, CategoryScopeValidator, InventoryError, InventoryInitializer,
    RecordingInventory, ScopeRejection, StaticScope,
};
pub use config::{ConfigError, GenerationConfig, WorkerConfig};
pub use error::GenerationError;
pub use orchestrator::{GENERATION_JOB, GenerationOrchestrator};
pub use persistence::{ExecutionGuard, PersistOutcome, Unguarded, VariantPersister};
pub use request::{
    AcceptedJob, ArchiveSummary, BatchReport, CreatedVariant, GenerateOutcome, GenerateRequest,
    GenerationSummary, JobStatusView, PreviewRequest, SubmissionStatus,
};
