//! Process-wide logging setup.

/// Initialize tracing with the defaults (`RUST_LOG`, else `info`; JSON output).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing with a configured default filter and output format.
pub fn init_with(filter: &str, json: bool) {
    tracing::init_with(filter, json);
}

/// Subscriber construction (filters, formatting).
pub mod tracing;
