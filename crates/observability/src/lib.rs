//! Logging and diagnostics setup shared by callscope crates.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(&ObservabilityConfig::from_env());
}

/// Logging configuration.
pub mod config;

/// Tracing subscriber installation (filters, formatters).
pub mod tracing;

pub use config::{ConfigError, LogFormat, ObservabilityConfig};
