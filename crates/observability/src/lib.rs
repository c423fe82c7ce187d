//! Tracing/logging setup shared by the engine binaries and tests.

/// Initialize process-wide JSON logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_json();
}

/// Initialize human-readable logging (local runs, demos).
pub fn init_pretty() {
    tracing::init_pretty();
}

/// Subscriber construction (filters, formats).
pub mod tracing;
