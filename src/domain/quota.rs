// Quota domain types shared by the resolver, the counter stores and configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tier used when a subject carries no tier, and the fallback for unknown tiers
pub const NORMAL_TIER: &str = "normal";

/// A limit of `limit` requests per `window_seconds`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub limit: u64,
    pub window_seconds: u64,
}

impl Quota {
    pub fn new(limit: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// How a quota key is built from the identifier and the request path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    /// One counter per (identifier, path)
    #[default]
    PerPath,
    /// One counter per identifier and rule, shared by every path under the rule
    PerIdentifier,
}

impl KeyScope {
    /// Build the counter key in `namespace` for an identifier, the request
    /// path and the prefix of the rule that matched it
    pub fn quota_key(&self, namespace: &str, identifier: &str, path: &str, rule_prefix: &str) -> String {
        match self {
            KeyScope::PerPath => format!("{}:{}:{}", namespace, identifier, path),
            KeyScope::PerIdentifier => format!("{}:{}:{}", namespace, identifier, rule_prefix),
        }
    }
}

/// Counting strategy used by a counter store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStrategy {
    /// Ordered log of event timestamps within the trailing window
    #[default]
    SlidingLog,
    /// (count, window-start) pair reset once the window has elapsed
    FixedWindow,
}

impl WindowStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStrategy::SlidingLog => "sliding_log",
            WindowStrategy::FixedWindow => "fixed_window",
        }
    }
}

/// What the engine does when the counter store cannot be consulted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit every request while the store is down
    #[default]
    FailOpen,
    /// Reject every request with 503 while the store is down
    FailClosed,
}
