//! `variantforge-core`: shared building blocks for variant generation.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{ActorId, BatchId, ProductGroupId, VariantId};
