//! Tracing/logging initialization.
//!
//! JSON lines with timestamps. `RUST_LOG` overrides the default directive, so
//! `RUST_LOG=stockforge_storage=debug` shows every unit fetch and retry.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVE: &str = "info";

/// Initialize tracing with [`DEFAULT_DIRECTIVE`].
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVE);
}

/// Initialize tracing, falling back to `directive` when `RUST_LOG` is unset
/// or invalid. Returns `false` if a global subscriber was already installed.
pub fn init_with_default(directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(std::env::var("RUST_LOG").ok().as_deref(), directive))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(true)
        .try_init()
        .is_ok()
}

fn filter(env: Option<&str>, directive: &str) -> EnvFilter {
    env.and_then(|e| EnvFilter::try_new(e).ok())
        .or_else(|| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
