//! Tracing setup for binaries embedding the client.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. The `RUST_LOG` environment
/// variable overrides the default `info` level. Calling this twice is
/// harmless; the second call is ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
