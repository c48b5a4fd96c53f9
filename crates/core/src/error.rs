//! Errors decidable from a request alone, before any storage is touched.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Pure-layer failure. Storage and dispatch failures live in the
/// infrastructure crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Axis input is unusable: missing id, duplicate axis, nothing selected.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The predicted combination count exceeds the hard ceiling.
    #[error("combination explosion: {predicted} combinations exceed the ceiling of {ceiling}")]
    Explosion { predicted: u64, ceiling: u64 },

    #[error("malformed identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn explosion(predicted: u64, ceiling: u64) -> Self {
        Self::Explosion { predicted, ceiling }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
