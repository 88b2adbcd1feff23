//! Shared tracing setup for bodega binaries and tests.

/// Initialize process-wide tracing from `RUST_LOG`, defaulting to `info`.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

pub use self::tracing::init_with;

/// Subscriber configuration (filters, output format).
pub mod tracing;
