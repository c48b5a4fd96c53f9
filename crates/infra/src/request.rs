//! Request and response shapes of the generation surface.

use serde::{Deserialize, Serialize};

use variantforge_core::{ActorId, BatchId, ProductGroupId, VariantId};
use variantforge_dimensions::{AxisInput, CombinationKey};

use crate::jobs::{JobId, JobState};
use crate::stores::audit::ExecutionMode;

/// Generate variants for a product group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub product_group_id: ProductGroupId,
    pub actor: ActorId,
    pub axes: AxisInput,
    /// Leading SKU segment; the group id is used when absent.
    #[serde(default)]
    pub sku_prefix: Option<String>,
}

impl GenerateRequest {
    pub fn new(product_group_id: ProductGroupId, actor: ActorId, axes: AxisInput) -> Self {
        Self {
            product_group_id,
            actor,
            axes,
            sku_prefix: None,
        }
    }

    pub fn with_sku_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sku_prefix = Some(prefix.into());
        self
    }
}

/// Preview a generation without persisting anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub product_group_id: ProductGroupId,
    pub axes: AxisInput,
    /// Previews by a known actor are audited.
    #[serde(default)]
    pub actor: Option<ActorId>,
}

/// Result of a generate call: finished inline, or accepted for background work.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GenerateOutcome {
    Completed(GenerationSummary),
    Accepted(AcceptedJob),
}

impl GenerateOutcome {
    pub fn batch_id(&self) -> BatchId {
        match self {
            GenerateOutcome::Completed(summary) => summary.batch_id,
            GenerateOutcome::Accepted(job) => job.batch_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedJob {
    pub job_id: JobId,
    pub batch_id: BatchId,
    pub total_expected: u64,
    pub status: SubmissionStatus,
}

/// One variant created by a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedVariant {
    pub variant_id: VariantId,
    pub combination_key: CombinationKey,
    pub sku: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSummary {
    pub batch_id: BatchId,
    pub total_generated: u64,
    pub total_skipped: u64,
    pub race_duplicates: u64,
    pub duration_ms: u64,
    pub execution: ExecutionMode,
    pub variants: Vec<CreatedVariant>,
}

/// Return value of a background generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub total_generated: u64,
    pub total_skipped: u64,
    pub race_duplicates: u64,
    pub duration_ms: u64,
    pub variant_ids: Vec<VariantId>,
}

/// Job status as exposed to callers polling a background generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub state: JobState,
    pub progress: u8,
    pub attempts_made: u32,
    pub result: Option<BatchReport>,
    pub failed_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub batch_id: BatchId,
    pub archived: u64,
}
