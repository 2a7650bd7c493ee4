//! Tracing subscriber setup for binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`. Events go to stderr so stdout stays free for output.
///
/// Returns an error if a global subscriber is already set.
pub fn init(default_directive: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
}
