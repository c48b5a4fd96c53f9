//! Audit recorder: one record per invocation, keyed by batch id.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use variantforge_core::{ActorId, BatchId, ProductGroupId};
use variantforge_dimensions::AxisInput;

use crate::error::GenerationError;
use crate::jobs::JobId;
use crate::stores::{
    AuditAction, AuditResult, AuditStatus, AuditStore, ExecutionMode, GenerationAuditRecord,
};

/// Identity and request snapshot of an audit record.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub batch_id: BatchId,
    pub product_group_id: ProductGroupId,
    pub actor: ActorId,
    pub action: AuditAction,
    pub axes: Option<AxisInput>,
    pub subject_batch_id: Option<BatchId>,
    pub predicted: Option<u64>,
}

impl AuditDraft {
    pub fn generate(
        batch_id: BatchId,
        product_group_id: ProductGroupId,
        actor: ActorId,
        axes: &AxisInput,
        predicted: u64,
    ) -> Self {
        Self {
            batch_id,
            product_group_id,
            actor,
            action: AuditAction::Generate,
            axes: Some(axes.clone()),
            subject_batch_id: None,
            predicted: Some(predicted),
        }
    }

    pub fn preview(
        product_group_id: ProductGroupId,
        actor: ActorId,
        axes: &AxisInput,
        predicted: u64,
    ) -> Self {
        Self {
            action: AuditAction::Preview,
            ..Self::generate(BatchId::new(), product_group_id, actor, axes, predicted)
        }
    }

    pub fn archive(product_group_id: ProductGroupId, actor: ActorId, archived: BatchId) -> Self {
        Self {
            batch_id: BatchId::new(),
            product_group_id,
            actor,
            action: AuditAction::ArchiveBatch,
            axes: None,
            subject_batch_id: Some(archived),
            predicted: None,
        }
    }

    fn into_record(
        self,
        status: AuditStatus,
        execution: Option<ExecutionMode>,
        result: AuditResult,
        completed: bool,
    ) -> GenerationAuditRecord {
        let now = Utc::now();
        GenerationAuditRecord {
            batch_id: self.batch_id,
            product_group_id: self.product_group_id,
            actor: self.actor,
            action: self.action,
            axes: self.axes,
            subject_batch_id: self.subject_batch_id,
            predicted: self.predicted,
            status,
            execution,
            job_id: None,
            attempts: 0,
            result,
            created_at: now,
            completed_at: completed.then_some(now),
        }
    }
}

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append an already-finished record.
    pub fn record(
        &self,
        draft: AuditDraft,
        status: AuditStatus,
        execution: Option<ExecutionMode>,
        result: AuditResult,
    ) -> Result<GenerationAuditRecord, GenerationError> {
        let record = draft.into_record(status, execution, result, true);
        self.store.append(record.clone())?;
        debug!(
            batch_id = %record.batch_id,
            action = ?record.action,
            status = ?record.status,
            "audit record written"
        );
        Ok(record)
    }

    /// Append a pending record for work that finishes later.
    pub fn open(
        &self,
        draft: AuditDraft,
        execution: ExecutionMode,
    ) -> Result<GenerationAuditRecord, GenerationError> {
        let record = draft.into_record(AuditStatus::Pending, Some(execution), AuditResult::default(), false);
        self.store.append(record.clone())?;
        debug!(batch_id = %record.batch_id, "audit record opened");
        Ok(record)
    }

    pub fn note_attempt(&self, batch_id: BatchId, job_id: JobId) -> Result<u32, GenerationError> {
        Ok(self.store.note_attempt(batch_id, job_id)?)
    }

    pub fn attach_job(&self, batch_id: BatchId, job_id: JobId) -> Result<(), GenerationError> {
        Ok(self.store.attach_job(batch_id, job_id)?)
    }

    /// Seal a pending record. Fails if it was already sealed.
    pub fn close(
        &self,
        batch_id: BatchId,
        status: AuditStatus,
        execution: ExecutionMode,
        result: AuditResult,
    ) -> Result<GenerationAuditRecord, GenerationError> {
        let record = self.store.complete(batch_id, status, execution, result)?;
        debug!(batch_id = %batch_id, status = ?status, "audit record closed");
        Ok(record)
    }

    pub fn get(&self, batch_id: BatchId) -> Result<Option<GenerationAuditRecord>, GenerationError> {
        Ok(self.store.get(batch_id)?)
    }

    pub fn list_for_group(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Vec<GenerationAuditRecord>, GenerationError> {
        Ok(self.store.list_for_group(product_group_id)?)
    }
}
