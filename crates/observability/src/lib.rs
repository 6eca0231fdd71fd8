//! Tracing/logging setup shared by guardrail binaries and test harnesses.

/// Initialize process-wide tracing with `RUST_LOG`, falling back to `info`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize with explicit filter directives (e.g. `guardrail_infra=debug`),
/// ignoring `RUST_LOG`.
pub fn init_with_filter(directives: &str) {
    tracing::init_with_filter(directives);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
