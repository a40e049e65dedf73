//! Process-wide tracing setup shared by the billing binaries.

/// Initialize structured logging with defaults taken from the environment.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init() {
    tracing::init(tracing::TracingConfig::from_env());
}

/// Subscriber configuration (filters, output format).
pub mod tracing;
