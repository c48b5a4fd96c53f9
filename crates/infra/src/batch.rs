//! Batch execution shared by the inline path and the background worker.

use std::time::Instant;

use tracing::{debug, info, warn};

use variantforge_core::BatchId;
use variantforge_dimensions::{AxisSet, SkuBase, normalize};

use crate::audit::AuditRecorder;
use crate::error::GenerationError;
use crate::jobs::{GenerationJob, Job, JobContext, JobHandler, JobResult, Settlement};
use crate::persistence::{ExecutionGuard, PersistOutcome, VariantPersister};
use crate::request::{BatchReport, CreatedVariant, GenerateRequest, GenerationSummary};
use crate::stores::{AuditResult, AuditStatus, ExecutionMode};

/// Result of one batch run.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub outcome: PersistOutcome,
    pub duration_ms: u64,
}

impl BatchRun {
    pub fn audit_result(&self) -> AuditResult {
        AuditResult {
            total_generated: self.outcome.generated(),
            total_skipped: self.outcome.skipped,
            race_duplicates: self.outcome.race_duplicates,
            duration_ms: self.duration_ms,
            archived: 0,
            error: None,
        }
    }

    pub fn summary(&self, batch_id: BatchId, execution: ExecutionMode) -> GenerationSummary {
        GenerationSummary {
            batch_id,
            total_generated: self.outcome.generated(),
            total_skipped: self.outcome.skipped,
            race_duplicates: self.outcome.race_duplicates,
            duration_ms: self.duration_ms,
            execution,
            variants: self
                .outcome
                .created
                .iter()
                .map(|r| CreatedVariant {
                    variant_id: r.id,
                    combination_key: r.draft.combination_key.clone(),
                    sku: r.draft.sku.clone(),
                })
                .collect(),
        }
    }

    pub fn report(&self, batch_id: BatchId) -> BatchReport {
        BatchReport {
            batch_id,
            total_generated: self.outcome.generated(),
            total_skipped: self.outcome.skipped,
            race_duplicates: self.outcome.race_duplicates,
            duration_ms: self.duration_ms,
            variant_ids: self.outcome.created.iter().map(|r| r.id).collect(),
        }
    }
}

/// Runs generation batches and, as a [`JobHandler`], background generation jobs.
pub struct BatchExecutor {
    persister: VariantPersister,
    recorder: AuditRecorder,
    hard_ceiling: u64,
}

impl BatchExecutor {
    pub fn new(persister: VariantPersister, recorder: AuditRecorder, hard_ceiling: u64) -> Self {
        Self {
            persister,
            recorder,
            hard_ceiling,
        }
    }

    pub fn run(
        &self,
        request: &GenerateRequest,
        batch_id: BatchId,
        axes: &AxisSet,
        guard: &dyn ExecutionGuard,
    ) -> Result<BatchRun, GenerationError> {
        let started = Instant::now();
        let sku_base = SkuBase::new(request.sku_prefix.as_deref(), request.product_group_id);

        let outcome = self.persister.persist(
            request.product_group_id,
            batch_id,
            axes,
            &sku_base,
            self.hard_ceiling,
            guard,
        )?;

        let run = BatchRun {
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            product_group_id = %request.product_group_id,
            batch_id = %batch_id,
            generated = run.outcome.generated(),
            skipped = run.outcome.skipped,
            race_duplicates = run.outcome.race_duplicates,
            duration_ms = run.duration_ms,
            "generation batch committed"
        );
        Ok(run)
    }

    fn run_job(&self, payload: &GenerationJob, ctx: &JobContext<'_>) -> Result<BatchRun, GenerationError> {
        let attempt = self.recorder.note_attempt(payload.batch_id, ctx.job_id())?;
        debug!(batch_id = %payload.batch_id, job_id = %ctx.job_id(), attempt, "running generation job");

        let axes = normalize(&payload.request.axes)?;
        self.run(&payload.request, payload.batch_id, &axes, ctx)
    }
}

impl JobHandler for BatchExecutor {
    fn handle(&self, job: &Job, ctx: &JobContext<'_>) -> JobResult {
        let payload: GenerationJob = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => return JobResult::Terminal(format!("malformed generation payload: {e}")),
        };

        match self.run_job(&payload, ctx) {
            Ok(run) => match serde_json::to_value(run.report(payload.batch_id)) {
                Ok(value) => JobResult::Success(value),
                Err(e) => JobResult::Terminal(format!("unserializable batch report: {e}")),
            },
            Err(e) if e.is_retryable() => JobResult::Retryable(e.to_string()),
            Err(e) => JobResult::Terminal(e.to_string()),
        }
    }

    fn on_settled(&self, job: &Job, settlement: &Settlement) {
        let Ok(payload) = serde_json::from_value::<GenerationJob>(job.payload.clone()) else {
            warn!(job_id = %job.id, "settled job has no generation payload");
            return;
        };

        let (status, result) = match settlement {
            Settlement::Retrying { .. } => return,
            Settlement::Completed(value) => match serde_json::from_value::<BatchReport>(value.clone()) {
                Ok(report) => (
                    AuditStatus::Succeeded,
                    AuditResult {
                        total_generated: report.total_generated,
                        total_skipped: report.total_skipped,
                        race_duplicates: report.race_duplicates,
                        duration_ms: report.duration_ms,
                        archived: 0,
                        error: None,
                    },
                ),
                Err(e) => (AuditStatus::Succeeded, AuditResult::failed(e.to_string(), 0)),
            },
            Settlement::Failed { reason } => (AuditStatus::Failed, AuditResult::failed(reason.clone(), 0)),
        };

        if let Err(e) = self
            .recorder
            .close(payload.batch_id, status, ExecutionMode::Background, result)
        {
            warn!(batch_id = %payload.batch_id, job_id = %job.id, error = %e, "could not close audit record");
        }
    }
}
