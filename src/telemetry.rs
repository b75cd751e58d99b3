//! Tracing bootstrap for binaries, examples, and tests.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global tracing subscriber: env-filtered fmt layer plus an
/// [`ErrorLayer`] for span traces on errors.
///
/// Respects `RUST_LOG`; defaults to `info` for this crate. Calling twice is
/// a no-op (the second install fails quietly).
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("loomflow=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(ErrorLayer::default())
        .try_init();
}
