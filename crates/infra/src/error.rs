//! Error taxonomy of the generation surface.

use std::time::Duration;

use variantforge_core::DomainError;
use variantforge_dimensions::AxisInput;

use crate::collaborators::{InventoryError, ScopeRejection};
use crate::jobs::QueueError;
use crate::stores::{AuditStoreError, StoreError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// Axis input rejected by the normalizer (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Attribute values outside the product group's category scope.
    #[error("category scope rejected the request: {0}")]
    Scope(String),

    /// Predicted combination count exceeds the hard ceiling.
    #[error("combination explosion: {predicted} combinations exceed the ceiling of {ceiling}")]
    Explosion { predicted: u64, ceiling: u64 },

    /// The broker could not take the job and the batch is too large to run inline.
    #[error("generation temporarily unavailable: {reason}")]
    Unavailable { reason: String, retry_after: Duration },

    /// The batch transaction was aborted; nothing was persisted.
    #[error("persistence failed: {message}")]
    Persistence {
        message: String,
        /// Axes of the aborted request, as submitted.
        axes: Option<Box<AxisInput>>,
    },

    /// Background execution exceeded its wall-clock budget.
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("audit failure: {0}")]
    Audit(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GenerationError {
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
            axes: None,
        }
    }

    /// Transient failures; the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Unavailable { .. }
                | GenerationError::Persistence { .. }
                | GenerationError::Timeout(_)
        )
    }

    /// Attach the submitted axes to a persistence failure.
    pub fn with_axes(self, input: &AxisInput) -> Self {
        match self {
            GenerationError::Persistence { message, .. } => GenerationError::Persistence {
                message,
                axes: Some(Box::new(input.clone())),
            },
            other => other,
        }
    }
}

impl From<DomainError> for GenerationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => GenerationError::Validation(msg),
            DomainError::Explosion { predicted, ceiling } => {
                GenerationError::Explosion { predicted, ceiling }
            }
            DomainError::InvalidId(msg) => GenerationError::Validation(msg),
        }
    }
}

impl From<ScopeRejection> for GenerationError {
    fn from(value: ScopeRejection) -> Self {
        GenerationError::Scope(value.to_string())
    }
}

impl From<StoreError> for GenerationError {
    fn from(value: StoreError) -> Self {
        GenerationError::persistence(value.to_string())
    }
}

impl From<InventoryError> for GenerationError {
    fn from(value: InventoryError) -> Self {
        GenerationError::persistence(value.to_string())
    }
}

impl From<AuditStoreError> for GenerationError {
    fn from(value: AuditStoreError) -> Self {
        match value {
            AuditStoreError::NotFound(batch) => GenerationError::NotFound(format!("batch {batch}")),
            other => GenerationError::Audit(other.to_string()),
        }
    }
}

impl From<QueueError> for GenerationError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::NotFound(job) => GenerationError::NotFound(format!("job {job}")),
            QueueError::Unavailable(reason) => GenerationError::Unavailable {
                reason,
                retry_after: Duration::from_secs(1),
            },
            other => GenerationError::Internal(other.to_string()),
        }
    }
}
