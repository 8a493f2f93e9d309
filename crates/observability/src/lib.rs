//! Tracing and logging setup shared by every process embedding the engine.

/// Initialize process-wide tracing with the `info` default filter.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
