//! Logging initialisation shared by the gateway binaries.

use crate::config::env_vars;

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "warn,thingbridge=info";

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the filter. JSON output is selected with
/// `THINGBRIDGE_LOG_JSON=true` for container deployments. Calling this more
/// than once is harmless; later calls are ignored.
pub fn init(verbose: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("info,thingbridge=debug")
        } else {
            tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)
        }
    });

    if env_vars::log_json() {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .try_init();
    }
}
