//! Process-wide logging setup shared by the engine binaries.

pub mod tracing;

pub use self::tracing::{LogFormat, ObservabilityConfig, UnknownLogFormat};

/// Install the default subscriber: JSON lines filtered by `RUST_LOG`.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    self::tracing::init_with(&ObservabilityConfig::default());
}

/// Install a subscriber for an explicit configuration.
pub fn init_with(config: &ObservabilityConfig) {
    self::tracing::init_with(config);
}
