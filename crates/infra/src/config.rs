//! Configuration loading from the process environment.
//!
//! | variable | meaning | default |
//! |----------|---------|---------|
//! | `DATABASE_URL` | Postgres connection string | unset (in-memory) |
//! | `STOCKFORGE_DB_MAX_CONNECTIONS` | pool size | `STOCKFORGE_MAX_CONCURRENT_FETCHES` |
//! | `STOCKFORGE_MAX_CONCURRENT_FETCHES` | repository calls in flight | 16 |
//! | `STOCKFORGE_MAX_FANOUT` | children descended at once per node | 8 |
//! | `STOCKFORGE_MAX_DEPTH` | deepest level below a root | 64 |
//! | `STOCKFORGE_FETCH_TIMEOUT_MS` | per-call timeout | none |
//! | `STOCKFORGE_RETRY_MAX_ATTEMPTS` | attempts per call, first included | 3 |
//! | `STOCKFORGE_RETRY_BASE_DELAY_MS` | first backoff delay | 50 |
//! | `STOCKFORGE_ALERT_INCLUDE_UNSTOCKED` | alert on catalog products stored nowhere | false |
//!
//! Unparsable values are logged and replaced by the default.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use stockforge_storage::{AggregationConfig, AlertConfig};

use crate::repository::postgres::CONNECTIONS_PER_FETCH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub aggregation: AggregationConfig,
    pub alerts: AlertConfig,
}

impl Default for InfraConfig {
    fn default() -> Self {
        let aggregation = AggregationConfig::default();
        Self {
            database_url: None,
            db_max_connections: pool_size_for(aggregation.max_concurrent_fetches),
            aggregation,
            alerts: AlertConfig::default(),
        }
    }
}

/// Load configuration from environment variables.
pub fn load_from_env() -> InfraConfig {
    load_from(|key| std::env::var(key).ok())
}

/// Load configuration from an arbitrary key lookup.
pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> InfraConfig {
    let defaults = InfraConfig::default();
    let mut aggregation = defaults.aggregation;

    aggregation.max_concurrent_fetches = parse_or(
        &lookup,
        "STOCKFORGE_MAX_CONCURRENT_FETCHES",
        aggregation.max_concurrent_fetches,
    )
    .max(1);
    aggregation.max_fanout = parse_or(&lookup, "STOCKFORGE_MAX_FANOUT", aggregation.max_fanout).max(1);
    aggregation.max_depth = parse_or(&lookup, "STOCKFORGE_MAX_DEPTH", aggregation.max_depth);
    aggregation.fetch_timeout = parse_opt::<u64>(&lookup, "STOCKFORGE_FETCH_TIMEOUT_MS").map(Duration::from_millis);
    aggregation.retry.max_attempts =
        parse_or(&lookup, "STOCKFORGE_RETRY_MAX_ATTEMPTS", aggregation.retry.max_attempts).max(1);
    if let Some(ms) = parse_opt::<u64>(&lookup, "STOCKFORGE_RETRY_BASE_DELAY_MS") {
        aggregation.retry.base_delay = Duration::from_millis(ms);
    }

    let db_max_connections = parse_or(
        &lookup,
        "STOCKFORGE_DB_MAX_CONNECTIONS",
        pool_size_for(aggregation.max_concurrent_fetches),
    )
    .max(1);

    let alerts = AlertConfig::default().with_include_unstocked(parse_or(
        &lookup,
        "STOCKFORGE_ALERT_INCLUDE_UNSTOCKED",
        false,
    ));

    InfraConfig {
        database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
        db_max_connections,
        aggregation,
        alerts,
    }
}

/// Connections needed so every permitted fetch gets one without waiting.
pub fn pool_size_for(max_concurrent_fetches: usize) -> u32 {
    u32::try_from(max_concurrent_fetches)
        .unwrap_or(u32::MAX)
        .saturating_mul(CONNECTIONS_PER_FETCH)
}

fn parse_opt<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    parse_opt(lookup, key).unwrap_or(default)
}
