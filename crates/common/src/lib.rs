//! Shared plumbing: venue environment selection, retry scheduling, logging.

mod environment;
mod retry;

pub use environment::VenueEnvironment;
pub use retry::RetryPolicy;

use tracing_subscriber::EnvFilter;

/// Initialize tracing with an env-filter (`RUST_LOG`, default `info`).
///
/// Safe to call once per process; later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
