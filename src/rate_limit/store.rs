use crate::domain::WindowStrategy;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Result of an atomic counter update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOutcome {
    /// Whether the event was recorded
    pub admitted: bool,
    /// Count after the update (after pruning, including the new event if admitted)
    pub count: u64,
    /// Oldest in-window event (sliding log) or window start (fixed window), epoch millis
    pub oldest_in_window_ms: Option<i64>,
}

impl CounterOutcome {
    /// Milliseconds until the oldest in-window event stops counting
    pub fn retry_after_ms(&self, now: DateTime<Utc>, window: Duration) -> i64 {
        match self.oldest_in_window_ms {
            Some(oldest) => (oldest + window_ms(window) - now.timestamp_millis()).max(0),
            None => 0,
        }
    }

    /// Whole seconds until a new request would be admitted, rounded up
    pub fn retry_after_seconds(&self, now: DateTime<Utc>, window: Duration) -> u64 {
        let millis = self.retry_after_ms(now, window);
        ((millis + 999) / 1000) as u64
    }
}

/// Per-key counters shared by every request handler
///
/// `get_and_update` must be atomic per key: two concurrent callers may never
/// both observe a free slot when only one remains.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Prune or reset the record for `key`, then record one event if the
    /// count is below `limit`. Rejected calls leave the record untouched.
    async fn get_and_update(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u64,
    ) -> Result<CounterOutcome>;

    /// Count of events in the active window, without recording one
    async fn current_count(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Result<u64>;

    /// Drop the record for `key`
    async fn reset(&self, key: &str) -> Result<()>;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<()>;

    fn strategy(&self) -> WindowStrategy;

    /// Backend name for logs and health output
    fn name(&self) -> &'static str;
}

pub(crate) fn window_ms(window: Duration) -> i64 {
    window.as_millis().min(i64::MAX as u128) as i64
}

/// Store used when no backend could be configured at all
///
/// Every call fails, so the engine's failure policy decides the outcome.
#[derive(Debug, Default)]
pub struct UnavailableStore {
    strategy: WindowStrategy,
}

impl UnavailableStore {
    pub fn new(strategy: WindowStrategy) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn get_and_update(
        &self,
        _key: &str,
        _now: DateTime<Utc>,
        _window: Duration,
        _limit: u64,
    ) -> Result<CounterOutcome> {
        Err(AppError::StoreUnavailable("no counter store configured".to_string()))
    }

    async fn current_count(&self, _key: &str, _now: DateTime<Utc>, _window: Duration) -> Result<u64> {
        Err(AppError::StoreUnavailable("no counter store configured".to_string()))
    }

    async fn reset(&self, _key: &str) -> Result<()> {
        Err(AppError::StoreUnavailable("no counter store configured".to_string()))
    }

    async fn ping(&self) -> Result<()> {
        Err(AppError::StoreUnavailable("no counter store configured".to_string()))
    }

    fn strategy(&self) -> WindowStrategy {
        self.strategy
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retry_after_rounds_up() {
        let outcome = CounterOutcome {
            admitted: false,
            count: 3,
            oldest_in_window_ms: Some(0),
        };
        let now = Utc.timestamp_millis_opt(30_500).unwrap();

        assert_eq!(outcome.retry_after_ms(now, Duration::from_secs(60)), 29_500);
        assert_eq!(outcome.retry_after_seconds(now, Duration::from_secs(60)), 30);
    }

    #[test]
    fn test_retry_after_floors_at_zero() {
        let outcome = CounterOutcome {
            admitted: false,
            count: 1,
            oldest_in_window_ms: Some(0),
        };
        let now = Utc.timestamp_millis_opt(120_000).unwrap();

        assert_eq!(outcome.retry_after_seconds(now, Duration::from_secs(60)), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_always_fails() {
        let store = UnavailableStore::new(WindowStrategy::SlidingLog);
        let result = store
            .get_and_update("k", Utc::now(), Duration::from_secs(1), 1)
            .await;

        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
        assert!(store.ping().await.is_err());
    }
}
