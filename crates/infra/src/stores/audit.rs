use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use variantforge_core::{ActorId, BatchId, ProductGroupId};
use variantforge_dimensions::AxisInput;

use crate::jobs::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Generate,
    Preview,
    ArchiveBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Where a generation batch actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Inline,
    Background,
    /// The broker was unavailable and the batch was small enough to run inline.
    InlineFallback,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditResult {
    pub total_generated: u64,
    pub total_skipped: u64,
    pub race_duplicates: u64,
    pub duration_ms: u64,
    /// Variants archived, for `ARCHIVE_BATCH`.
    #[serde(default)]
    pub archived: u64,
    pub error: Option<String>,
}

impl AuditResult {
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            duration_ms,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// One record per invocation, keyed by batch id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationAuditRecord {
    pub batch_id: BatchId,
    pub product_group_id: ProductGroupId,
    pub actor: ActorId,
    pub action: AuditAction,
    /// Axes exactly as submitted.
    pub axes: Option<AxisInput>,
    /// Batch acted upon, for `ARCHIVE_BATCH`.
    pub subject_batch_id: Option<BatchId>,
    pub predicted: Option<u64>,
    pub status: AuditStatus,
    pub execution: Option<ExecutionMode>,
    pub job_id: Option<JobId>,
    /// Background attempts started for this batch.
    pub attempts: u32,
    pub result: AuditResult,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationAuditRecord {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditStoreError {
    #[error("audit record already exists for batch {0}")]
    Duplicate(BatchId),
    #[error("no audit record for batch {0}")]
    NotFound(BatchId),
    #[error("audit record for batch {0} is already completed")]
    Sealed(BatchId),
    #[error("audit storage error: {0}")]
    Storage(String),
}

/// Append-only audit storage, unique on batch id.
///
/// A record may be updated while pending; once completed it is immutable.
pub trait AuditStore: Send + Sync {
    fn append(&self, record: GenerationAuditRecord) -> Result<(), AuditStoreError>;

    fn get(&self, batch_id: BatchId) -> Result<Option<GenerationAuditRecord>, AuditStoreError>;

    /// Increment the attempt counter of a pending record and remember the job
    /// running it; returns the new count.
    fn note_attempt(&self, batch_id: BatchId, job_id: JobId) -> Result<u32, AuditStoreError>;

    fn attach_job(&self, batch_id: BatchId, job_id: JobId) -> Result<(), AuditStoreError>;

    /// Seal a pending record with its final status and result.
    fn complete(
        &self,
        batch_id: BatchId,
        status: AuditStatus,
        execution: ExecutionMode,
        result: AuditResult,
    ) -> Result<GenerationAuditRecord, AuditStoreError>;

    fn list_for_group(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Vec<GenerationAuditRecord>, AuditStoreError>;
}

impl<S> AuditStore for Arc<S>
where
    S: AuditStore + ?Sized,
{
    fn append(&self, record: GenerationAuditRecord) -> Result<(), AuditStoreError> {
        (**self).append(record)
    }

    fn get(&self, batch_id: BatchId) -> Result<Option<GenerationAuditRecord>, AuditStoreError> {
        (**self).get(batch_id)
    }

    fn note_attempt(&self, batch_id: BatchId, job_id: JobId) -> Result<u32, AuditStoreError> {
        (**self).note_attempt(batch_id, job_id)
    }

    fn attach_job(&self, batch_id: BatchId, job_id: JobId) -> Result<(), AuditStoreError> {
        (**self).attach_job(batch_id, job_id)
    }

    fn complete(
        &self,
        batch_id: BatchId,
        status: AuditStatus,
        execution: ExecutionMode,
        result: AuditResult,
    ) -> Result<GenerationAuditRecord, AuditStoreError> {
        (**self).complete(batch_id, status, execution, result)
    }

    fn list_for_group(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Vec<GenerationAuditRecord>, AuditStoreError> {
        (**self).list_for_group(product_group_id)
    }
}

/// In-memory audit store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<HashMap<BatchId, GenerationAuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_pending<T>(
        &self,
        batch_id: BatchId,
        f: impl FnOnce(&mut GenerationAuditRecord) -> T,
    ) -> Result<T, AuditStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let record = records
            .get_mut(&batch_id)
            .ok_or(AuditStoreError::NotFound(batch_id))?;
        if record.is_completed() {
            return Err(AuditStoreError::Sealed(batch_id));
        }
        Ok(f(record))
    }
}

fn poisoned<T>(_: T) -> AuditStoreError {
    AuditStoreError::Storage("audit store lock poisoned".to_string())
}

impl AuditStore for InMemoryAuditStore {
    fn append(&self, record: GenerationAuditRecord) -> Result<(), AuditStoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(&record.batch_id) {
            return Err(AuditStoreError::Duplicate(record.batch_id));
        }
        records.insert(record.batch_id, record);
        Ok(())
    }

    fn get(&self, batch_id: BatchId) -> Result<Option<GenerationAuditRecord>, AuditStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(&batch_id).cloned())
    }

    fn note_attempt(&self, batch_id: BatchId, job_id: JobId) -> Result<u32, AuditStoreError> {
        self.with_pending(batch_id, |record| {
            record.job_id = Some(job_id);
            record.attempts += 1;
            record.attempts
        })
    }

    fn attach_job(&self, batch_id: BatchId, job_id: JobId) -> Result<(), AuditStoreError> {
        self.with_pending(batch_id, |record| {
            record.job_id = Some(job_id);
        })
    }

    fn complete(
        &self,
        batch_id: BatchId,
        status: AuditStatus,
        execution: ExecutionMode,
        result: AuditResult,
    ) -> Result<GenerationAuditRecord, AuditStoreError> {
        self.with_pending(batch_id, |record| {
            record.status = status;
            record.execution = Some(execution);
            record.result = result;
            record.completed_at = Some(Utc::now());
            record.clone()
        })
    }

    fn list_for_group(
        &self,
        product_group_id: ProductGroupId,
    ) -> Result<Vec<GenerationAuditRecord>, AuditStoreError> {
        let records = self.records.read().map_err(poisoned)?;
        let mut out: Vec<_> = records
            .values()
            .filter(|r| r.product_group_id == product_group_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.created_at, r.batch_id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(batch_id: BatchId) -> GenerationAuditRecord {
        GenerationAuditRecord {
            batch_id,
            product_group_id: ProductGroupId::new(),
            actor: ActorId::new(),
            action: AuditAction::Generate,
            axes: Some(AxisInput::default()),
            subject_batch_id: None,
            predicted: Some(480),
            status: AuditStatus::Pending,
            execution: Some(ExecutionMode::Background),
            job_id: None,
            attempts: 0,
            result: AuditResult::default(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn batch_id_is_unique() {
        let store = InMemoryAuditStore::new();
        let batch = BatchId::new();
        store.append(pending(batch)).unwrap();
        assert!(matches!(
            store.append(pending(batch)),
            Err(AuditStoreError::Duplicate(b)) if b == batch
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn pending_record_tracks_attempts_until_completed() {
        let store = InMemoryAuditStore::new();
        let batch = BatchId::new();
        store.append(pending(batch)).unwrap();

        let job = JobId::new();
        assert_eq!(store.note_attempt(batch, job).unwrap(), 1);
        assert_eq!(store.note_attempt(batch, job).unwrap(), 2);

        let sealed = store
            .complete(
                batch,
                AuditStatus::Succeeded,
                ExecutionMode::Background,
                AuditResult {
                    total_generated: 480,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(sealed.attempts, 2);
        assert_eq!(sealed.job_id, Some(job));
        assert!(sealed.completed_at.is_some());
    }

    #[test]
    fn completed_records_are_immutable() {
        let store = InMemoryAuditStore::new();
        let batch = BatchId::new();
        store.append(pending(batch)).unwrap();
        store
            .complete(batch, AuditStatus::Failed, ExecutionMode::Background, AuditResult::failed("boom", 3))
            .unwrap();

        assert!(matches!(store.note_attempt(batch, JobId::new()), Err(AuditStoreError::Sealed(_))));
        assert!(matches!(store.attach_job(batch, JobId::new()), Err(AuditStoreError::Sealed(_))));
        assert!(matches!(
            store.complete(batch, AuditStatus::Succeeded, ExecutionMode::Inline, AuditResult::default()),
            Err(AuditStoreError::Sealed(_))
        ));

        let record = store.get(batch).unwrap().unwrap();
        assert_eq!(record.status, AuditStatus::Failed);
        assert_eq!(record.result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn action_serializes_in_upper_case() {
        assert_eq!(
            serde_json::to_value(AuditAction::ArchiveBatch).unwrap(),
            serde_json::json!("ARCHIVE_BATCH")
        );
        assert_eq!(
            serde_json::to_value(ExecutionMode::InlineFallback).unwrap(),
            serde_json::json!("inline_fallback")
        );
    }
}
