//! Process-lifecycle logging (SPEC_FULL.md §B.3). This is the leveled
//! `tracing` sink for bind/fork/restart/signal events; the per-request
//! access log is a separate, line-oriented sink (see [`crate::access_log`]).

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Installs the global `tracing` subscriber. Honors `RUST_LOG` via
/// `EnvFilter`, defaulting to `info` so a freshly started daemon is quiet
/// but visible.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already installed, e.g. by a test harness driving main() twice.
    }
}
