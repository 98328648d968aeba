//! Log output for the service process.
//!
//! One `fmt` layer behind an `EnvFilter`. The filter sits in a reload layer so
//! the level from the configuration file can replace the bootstrap level once
//! the configuration is known. An explicit `RUST_LOG` pins the filter.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

const BOOTSTRAP_LEVEL: &str = "info";

fn rust_log_is_set() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

fn filter_for(level: &str) -> EnvFilter {
    if rust_log_is_set() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    EnvFilter::new(level)
}

/// Install the global subscriber at the bootstrap level.
pub fn init_tracing() {
    init_tracing_with_level(BOOTSTRAP_LEVEL);
}

/// Install the global subscriber at `level`. Later calls are no-ops.
pub fn init_tracing_with_level(level: &str) {
    let (filter, handle) = reload::Layer::new(filter_for(level));
    if FILTER.set(handle).is_err() {
        return;
    }

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
    if let Err(e) = installed {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

/// Switch to the configured level. Ignored when `RUST_LOG` is set.
pub fn apply_logging_level(level: &str) {
    if rust_log_is_set() {
        return;
    }
    let Some(handle) = FILTER.get() else {
        return;
    };
    if let Err(e) = handle.reload(EnvFilter::new(level)) {
        tracing::warn!(level, error = %e, "Could not change log level");
    }
}
