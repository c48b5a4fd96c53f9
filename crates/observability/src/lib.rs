//! Logging setup shared by the binaries.

/// Initialize process-wide logging with the format named by
/// `VARIANTFORGE_LOG_FORMAT` (JSON unless it says `pretty`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber configuration (filters, formats).
pub mod tracing;

pub use crate::tracing::LogFormat;
