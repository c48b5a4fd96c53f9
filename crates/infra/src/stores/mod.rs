//! Storage traits and in-memory implementations (variants, audit).

pub mod audit;
pub mod variants;

pub use audit::{
    AuditAction, AuditResult, AuditStatus, AuditStore, AuditStoreError, ExecutionMode,
    GenerationAuditRecord, InMemoryAuditStore,
};
pub use variants::{
    InMemoryVariantStore, InsertOutcome, StoreError, VariantDraft, VariantRecord, VariantStore,
    VariantTransaction,
};
