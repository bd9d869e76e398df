//! Tracing setup with a runtime-adjustable level.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static LEVEL_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when it is set and parses.
pub fn init_tracing(level: &str) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (filter_layer, handle) = reload::Layer::new(filter);
    let _ = LEVEL_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Switch the active level, e.g. after the configuration file changed.
pub fn set_level(level: &str) {
    let Some(handle) = LEVEL_HANDLE.get() else {
        return;
    };
    if let Err(e) = handle.modify(|filter| *filter = EnvFilter::new(level)) {
        tracing::warn!(error = %e, level, "Failed to change log level");
    } else {
        tracing::debug!(level, "Log level changed");
    }
}
