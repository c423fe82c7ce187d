//! Engine configuration.
//!
//! Defaults are usable as-is; [`EngineConfig::from_env`] overrides individual
//! knobs from `STOCKFLOW_*` variables (millisecond integers). Malformed values
//! are logged and ignored.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::retry::RetryPolicy;
use crate::views::{DASHBOARD_COUNTS, LOW_STOCK_ALERTS, ORDER_LIST, PENDING_INDEX};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Interval between recompute-and-resubscribe passes while the change
    /// feed is unavailable.
    pub poll_interval: Duration,
    /// Throttle window for views without an explicit entry.
    pub default_throttle: Duration,
    pub throttles: BTreeMap<String, Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let throttles = BTreeMap::from([
            (LOW_STOCK_ALERTS.to_string(), Duration::from_secs(2)),
            (PENDING_INDEX.to_string(), Duration::from_millis(250)),
            (ORDER_LIST.to_string(), Duration::from_millis(250)),
            (DASHBOARD_COUNTS.to_string(), Duration::ZERO),
        ]);
        Self {
            poll_interval: Duration::from_secs(10),
            default_throttle: Duration::from_millis(250),
            throttles,
        }
    }
}

impl DispatcherConfig {
    pub fn throttle_for(&self, view: &str) -> Duration {
        self.throttles
            .get(view)
            .copied()
            .unwrap_or(self.default_throttle)
    }

    pub fn with_throttle(mut self, view: impl Into<String>, window: Duration) -> Self {
        self.throttles.insert(view.into(), window);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reconcile_retry: RetryPolicy,
    /// How long a cached document read may be served (zero disables caching).
    pub cache_ttl: Duration,
    pub dispatcher: DispatcherConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_retry: RetryPolicy::default(),
            cache_ttl: Duration::from_secs(5),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ttl) = millis(&lookup, "STOCKFLOW_CACHE_TTL_MS") {
            config.cache_ttl = ttl;
        }
        if let Some(interval) = millis(&lookup, "STOCKFLOW_POLL_INTERVAL_MS") {
            config.dispatcher.poll_interval = interval;
        }
        if let Some(base) = millis(&lookup, "STOCKFLOW_RECONCILE_BACKOFF_MS") {
            config.reconcile_retry.base_delay = base;
        }
        if let Some(attempts) = parse::<u32>(&lookup, "STOCKFLOW_RECONCILE_ATTEMPTS") {
            if attempts == 0 {
                warn!(key = "STOCKFLOW_RECONCILE_ATTEMPTS", "must be at least 1; ignoring");
            } else {
                config.reconcile_retry.max_attempts = attempts;
            }
        }

        for view in [LOW_STOCK_ALERTS, PENDING_INDEX, ORDER_LIST, DASHBOARD_COUNTS] {
            let key = format!("STOCKFLOW_THROTTLE_{}_MS", view.to_ascii_uppercase());
            if let Some(window) = millis(&lookup, &key) {
                config.dispatcher.throttles.insert(view.to_string(), window);
            }
        }

        config
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring malformed configuration value");
            None
        }
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    parse::<u64>(lookup, key).map(Duration::from_millis)
}
