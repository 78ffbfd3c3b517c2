//! Process-wide tracing setup shared by binaries and tests.

/// Initialize tracing for the process.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filters, formatting).
pub mod tracing;
