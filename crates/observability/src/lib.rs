//! Tracing/logging setup shared by the ledgerlock binaries.

/// Initialize process-wide tracing with an `info` default filter.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Tracing configuration (filters, output format).
pub mod tracing;
