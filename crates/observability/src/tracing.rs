//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize tracing with the `RUST_LOG` filter, or `info` when unset.
pub fn init() {
    init_with("info", true);
}

/// Initialize tracing with an explicit fallback filter.
///
/// `RUST_LOG` still wins when set. `json` selects structured output; plain
/// text is easier to read in a terminal. Returns `false` when a global
/// subscriber was already installed.
pub fn init_with(default_filter: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
