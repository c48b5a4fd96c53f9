//! Generation orchestrator.
//!
//! Explicitly constructed with its collaborators and configuration; decides
//! per request whether a batch runs inline or in the background, and makes
//! sure every generate invocation, rejected ones included, leaves exactly one
//! audit record.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use variantforge_core::{ActorId, BatchId, ProductGroupId};
use variantforge_dimensions::{
    AxisInput, AxisSet, DimensionDiff, Preview, build_preview, diff_dimensions,
    ensure_within_ceiling, normalize, predict_count,
};

use crate::audit::{AuditDraft, AuditRecorder};
use crate::batch::BatchExecutor;
use crate::collaborators::{CategoryScopeValidator, InventoryInitializer};
use crate::config::{ConfigError, GenerationConfig};
use crate::error::GenerationError;
use crate::jobs::{
    GenerationJob, GenerationWorkerPool, JobId, JobQueue, QueueError, WorkerPoolHandle,
};
use crate::persistence::{Unguarded, VariantPersister};
use crate::request::{
    AcceptedJob, ArchiveSummary, BatchReport, GenerateOutcome, GenerateRequest, JobStatusView,
    PreviewRequest, SubmissionStatus,
};
use crate::stores::{
    AuditResult, AuditStatus, AuditStore, ExecutionMode, GenerationAuditRecord, VariantStore,
};

/// Job name used for background generation batches.
pub const GENERATION_JOB: &str = "variant-generation";

pub struct GenerationOrchestrator {
    config: GenerationConfig,
    variants: Arc<dyn VariantStore>,
    queue: Arc<dyn JobQueue>,
    scope: Arc<dyn CategoryScopeValidator>,
    recorder: AuditRecorder,
    executor: Arc<BatchExecutor>,
}

impl GenerationOrchestrator {
    pub fn new(
        config: GenerationConfig,
        variants: Arc<dyn VariantStore>,
        audit: Arc<dyn AuditStore>,
        queue: Arc<dyn JobQueue>,
        scope: Arc<dyn CategoryScopeValidator>,
        inventory: Arc<dyn InventoryInitializer>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let recorder = AuditRecorder::new(audit);
        let persister = VariantPersister::new(variants.clone(), inventory);
        let executor = Arc::new(BatchExecutor::new(
            persister,
            recorder.clone(),
            config.hard_ceiling,
        ));

        Ok(Self {
            config,
            variants,
            queue,
            scope,
            recorder,
            executor,
        })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Handler for background generation jobs.
    pub fn executor(&self) -> Arc<BatchExecutor> {
        self.executor.clone()
    }

    /// Start a worker pool consuming this orchestrator's queue.
    pub fn spawn_workers(&self) -> std::io::Result<WorkerPoolHandle> {
        GenerationWorkerPool::spawn(
            self.queue.clone(),
            self.executor.clone(),
            self.config.worker.clone(),
        )
    }

    /// Prediction, breakdown and a capped list of combinations. Nothing is
    /// persisted; previews by a known actor are audited.
    pub fn preview(&self, request: &PreviewRequest) -> Result<Preview, GenerationError> {
        let axes = self.normalize_scoped(request.product_group_id, &request.axes)?;
        let preview = build_preview(&axes, self.config.hard_ceiling, self.config.preview_limit);

        if let Some(actor) = request.actor {
            self.recorder.record(
                AuditDraft::preview(request.product_group_id, actor, &request.axes, preview.predicted),
                AuditStatus::Succeeded,
                None,
                AuditResult::default(),
            )?;
        }

        debug!(
            product_group_id = %request.product_group_id,
            predicted = preview.predicted,
            within_ceiling = preview.within_ceiling,
            "preview built"
        );
        Ok(preview)
    }

    /// Rejections (invalid axes, scope, explosion) are terminal and leave a
    /// failed record; nothing else is written for them.
    pub fn generate(&self, request: &GenerateRequest) -> Result<GenerateOutcome, GenerationError> {
        let batch_id = BatchId::new();
        let mut predicted = None;
        let admitted = self
            .normalize_scoped(request.product_group_id, &request.axes)
            .and_then(|axes| {
                let count = predict_count(&axes);
                predicted = Some(count);
                ensure_within_ceiling(count, self.config.hard_ceiling)?;
                Ok((axes, count))
            });

        let (axes, predicted) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => {
                self.record_rejection(request, batch_id, predicted, &e);
                return Err(e);
            }
        };

        if predicted <= self.config.inline_threshold {
            info!(
                product_group_id = %request.product_group_id,
                batch_id = %batch_id,
                predicted,
                "running generation inline"
            );
            return self.run_inline(request, batch_id, &axes, predicted, ExecutionMode::Inline);
        }

        self.dispatch(request, batch_id, &axes, predicted)
    }

    pub fn job_status(&self, job_id: JobId) -> Result<JobStatusView, GenerationError> {
        let snapshot = self
            .queue
            .get(job_id)?
            .ok_or_else(|| GenerationError::NotFound(format!("job {job_id}")))?;

        let result = snapshot
            .return_value
            .and_then(|value| serde_json::from_value::<BatchReport>(value).ok());

        Ok(JobStatusView {
            job_id,
            state: snapshot.state,
            progress: snapshot.progress,
            attempts_made: snapshot.attempts_made,
            result,
            failed_reason: snapshot.failed_reason,
        })
    }

    /// Structural diff of two raw axis sets, both normalized first.
    pub fn diff(&self, previous: &AxisInput, next: &AxisInput) -> Result<DimensionDiff, GenerationError> {
        let previous = normalize(previous)?;
        let next = normalize(next)?;
        Ok(diff_dimensions(&previous, &next))
    }

    /// Archive the variants created by a batch, freeing their combinations.
    pub fn archive_batch(
        &self,
        product_group_id: ProductGroupId,
        batch_id: BatchId,
        actor: ActorId,
    ) -> Result<ArchiveSummary, GenerationError> {
        let known = self
            .recorder
            .get(batch_id)?
            .is_some_and(|r| r.product_group_id == product_group_id);
        if !known {
            return Err(GenerationError::NotFound(format!("batch {batch_id}")));
        }

        let archived = self.variants.archive_batch(product_group_id, batch_id)?;
        self.recorder.record(
            AuditDraft::archive(product_group_id, actor, batch_id),
            AuditStatus::Succeeded,
            None,
            AuditResult {
                archived,
                ..Default::default()
            },
        )?;

        info!(product_group_id = %product_group_id, batch_id = %batch_id, archived, "batch archived");
        Ok(ArchiveSummary { batch_id, archived })
    }

    pub fn audit_record(&self, batch_id: BatchId) -> Result<Option<GenerationAuditRecord>, GenerationError> {
        self.recorder.get(batch_id)
    }

    pub fn audit_trail(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Vec<GenerationAuditRecord>, GenerationError> {
        self.recorder.list_for_group(product_group_id)
    }

    fn normalize_scoped(
        &self,
        product_group_id: ProductGroupId,
        input: &AxisInput,
    ) -> Result<AxisSet, GenerationError> {
        let axes = normalize(input)?;
        self.scope.validate(product_group_id, &axes.attribute_values())?;
        Ok(axes)
    }

    fn record_rejection(
        &self,
        request: &GenerateRequest,
        batch_id: BatchId,
        predicted: Option<u64>,
        error: &GenerationError,
    ) {
        let draft = AuditDraft {
            predicted,
            ..AuditDraft::generate(
                batch_id,
                request.product_group_id,
                request.actor,
                &request.axes,
                0,
            )
        };
        let recorded = self.recorder.record(
            draft,
            AuditStatus::Failed,
            None,
            AuditResult::failed(error.to_string(), 0),
        );
        if let Err(audit_err) = recorded {
            warn!(batch_id = %batch_id, error = %audit_err, "could not audit rejected generation");
        }

        info!(
            product_group_id = %request.product_group_id,
            batch_id = %batch_id,
            error = %error,
            "generation rejected"
        );
    }

    fn run_inline(
        &self,
        request: &GenerateRequest,
        batch_id: BatchId,
        axes: &AxisSet,
        predicted: u64,
        execution: ExecutionMode,
    ) -> Result<GenerateOutcome, GenerationError> {
        let started = Instant::now();
        let result = self.executor.run(request, batch_id, axes, &Unguarded);

        let (status, audit_result) = match &result {
            Ok(run) => (AuditStatus::Succeeded, run.audit_result()),
            Err(e) => (
                AuditStatus::Failed,
                AuditResult::failed(e.to_string(), started.elapsed().as_millis() as u64),
            ),
        };

        // a fallback run closes the record opened before dispatch
        let audited = match execution {
            ExecutionMode::InlineFallback => self
                .recorder
                .close(batch_id, status, execution, audit_result)
                .map(|_| ()),
            _ => self
                .recorder
                .record(
                    AuditDraft::generate(
                        batch_id,
                        request.product_group_id,
                        request.actor,
                        &request.axes,
                        predicted,
                    ),
                    status,
                    Some(execution),
                    audit_result,
                )
                .map(|_| ()),
        };

        let run = result.map_err(|e| e.with_axes(&request.axes))?;
        audited?;
        Ok(GenerateOutcome::Completed(run.summary(batch_id, execution)))
    }

    fn dispatch(
        &self,
        request: &GenerateRequest,
        batch_id: BatchId,
        axes: &AxisSet,
        predicted: u64,
    ) -> Result<GenerateOutcome, GenerationError> {
        self.recorder.open(
            AuditDraft::generate(
                batch_id,
                request.product_group_id,
                request.actor,
                &request.axes,
                predicted,
            ),
            ExecutionMode::Background,
        )?;

        let payload = serde_json::to_value(GenerationJob {
            batch_id,
            predicted,
            request: request.clone(),
        })
        .map_err(|e| GenerationError::Internal(format!("unserializable job payload: {e}")));

        let enqueued = match payload {
            Ok(payload) => self.enqueue(payload, batch_id),
            Err(e) => {
                self.close_failed(batch_id, &e.to_string());
                return Err(e);
            }
        };

        let err = match enqueued {
            Ok(job_id) => {
                // the worker also records its job id, so a sealed record is fine here
                if let Err(e) = self.recorder.attach_job(batch_id, job_id) {
                    debug!(batch_id = %batch_id, job_id = %job_id, error = %e, "job id not attached");
                }
                info!(
                    product_group_id = %request.product_group_id,
                    batch_id = %batch_id,
                    job_id = %job_id,
                    predicted,
                    "generation dispatched to background"
                );
                return Ok(GenerateOutcome::Accepted(AcceptedJob {
                    job_id,
                    batch_id,
                    total_expected: predicted,
                    status: SubmissionStatus::Pending,
                }));
            }
            Err(err) => err,
        };

        match self.config.fallback_ceiling {
            Some(fallback) if predicted <= fallback => {
                warn!(
                    product_group_id = %request.product_group_id,
                    batch_id = %batch_id,
                    predicted,
                    fallback_ceiling = fallback,
                    error = %err,
                    "broker unavailable; running generation inline"
                );
                self.run_inline(request, batch_id, axes, predicted, ExecutionMode::InlineFallback)
            }
            _ => {
                warn!(
                    product_group_id = %request.product_group_id,
                    batch_id = %batch_id,
                    predicted,
                    error = %err,
                    "broker unavailable; generation rejected"
                );
                self.close_failed(batch_id, &err.to_string());
                Err(GenerationError::Unavailable {
                    reason: err.to_string(),
                    retry_after: self
                        .config
                        .dispatch_retry
                        .delay_for_attempt(self.config.dispatch_retry.max_attempts),
                })
            }
        }
    }

    /// Add the job, retrying transient broker failures with backoff.
    fn enqueue(&self, payload: serde_json::Value, batch_id: BatchId) -> Result<JobId, QueueError> {
        let policy = &self.config.dispatch_retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.queue.add(GENERATION_JOB, payload.clone(), self.config.job.clone()) {
                Ok(job_id) => return Ok(job_id),
                Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        batch_id = %batch_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "enqueue failed; retrying"
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn close_failed(&self, batch_id: BatchId, error: &str) {
        if let Err(e) = self.recorder.close(
            batch_id,
            AuditStatus::Failed,
            ExecutionMode::Background,
            AuditResult::failed(error, 0),
        ) {
            warn!(batch_id = %batch_id, error = %e, "could not close audit record");
        }
    }
}
