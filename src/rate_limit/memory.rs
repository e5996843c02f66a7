// In-process counter store, used for single-instance deployments and tests

use crate::domain::WindowStrategy;
use crate::errors::Result;
use crate::rate_limit::clock::Clock;
use crate::rate_limit::store::{window_ms, CounterOutcome, CounterStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
enum CounterRecord {
    /// Event timestamps (millis) to multiplicity, plus the total multiplicity
    Log { events: BTreeMap<i64, u32>, len: u64 },
    Fixed { count: u64, window_start_ms: i64 },
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: CounterRecord,
    expires_at_ms: i64,
}

impl CounterRecord {
    fn empty(strategy: WindowStrategy, now_ms: i64) -> Self {
        match strategy {
            WindowStrategy::SlidingLog => CounterRecord::Log {
                events: BTreeMap::new(),
                len: 0,
            },
            WindowStrategy::FixedWindow => CounterRecord::Fixed {
                count: 0,
                window_start_ms: now_ms,
            },
        }
    }

    fn matches(&self, strategy: WindowStrategy) -> bool {
        matches!(
            (self, strategy),
            (CounterRecord::Log { .. }, WindowStrategy::SlidingLog)
                | (CounterRecord::Fixed { .. }, WindowStrategy::FixedWindow)
        )
    }
}

/// Counter store backed by a sharded concurrent map
///
/// The shard write lock held by `DashMap::entry` makes each update atomic per key.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    strategy: WindowStrategy,
    records: DashMap<String, StoredRecord>,
}

impl InMemoryCounterStore {
    pub fn new(strategy: WindowStrategy) -> Self {
        Self {
            strategy,
            records: DashMap::new(),
        }
    }

    /// Number of live records, expired or not
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove records whose expiry has passed; returns how many were dropped
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let before = self.records.len();
        self.records.retain(|_, stored| stored.expires_at_ms > now_ms);
        before.saturating_sub(self.records.len())
    }

    /// Periodically purge expired records until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, clock: Arc<dyn Clock>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired(clock.now());
                if purged > 0 {
                    tracing::debug!(purged = purged, remaining = store.len(), "Purged expired counters");
                }
            }

            tracing::debug!("Counter sweeper stopped");
        })
    }
}

/// Drop events at or before `cutoff_ms` and return the new length
fn prune_log(events: &mut BTreeMap<i64, u32>, len: &mut u64, cutoff_ms: i64) {
    let kept = events.split_off(&cutoff_ms.saturating_add(1));
    let removed: u64 = events.values().map(|n| u64::from(*n)).sum();
    *events = kept;
    *len = len.saturating_sub(removed);
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get_and_update(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u64,
    ) -> Result<CounterOutcome> {
        let now_ms = now.timestamp_millis();
        let window_ms = window_ms(window);

        let mut entry = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| StoredRecord {
                record: CounterRecord::empty(self.strategy, now_ms),
                expires_at_ms: now_ms.saturating_add(window_ms),
            });
        let stored = entry.value_mut();

        if !stored.record.matches(self.strategy) {
            stored.record = CounterRecord::empty(self.strategy, now_ms);
        }

        let outcome = match &mut stored.record {
            CounterRecord::Log { events, len } => {
                prune_log(events, len, now_ms.saturating_sub(window_ms));

                if *len >= limit {
                    CounterOutcome {
                        admitted: false,
                        count: *len,
                        oldest_in_window_ms: events.keys().next().copied(),
                    }
                } else {
                    *events.entry(now_ms).or_insert(0) += 1;
                    *len += 1;
                    CounterOutcome {
                        admitted: true,
                        count: *len,
                        oldest_in_window_ms: events.keys().next().copied(),
                    }
                }
            }
            CounterRecord::Fixed {
                count,
                window_start_ms,
            } => {
                if now_ms.saturating_sub(*window_start_ms) >= window_ms {
                    *count = 0;
                    *window_start_ms = now_ms;
                }

                if *count >= limit {
                    CounterOutcome {
                        admitted: false,
                        count: *count,
                        oldest_in_window_ms: Some(*window_start_ms),
                    }
                } else {
                    *count += 1;
                    CounterOutcome {
                        admitted: true,
                        count: *count,
                        oldest_in_window_ms: Some(*window_start_ms),
                    }
                }
            }
        };

        if outcome.admitted {
            stored.expires_at_ms = now_ms.saturating_add(window_ms);
        }

        Ok(outcome)
    }

    async fn current_count(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Result<u64> {
        let now_ms = now.timestamp_millis();
        let window_ms = window_ms(window);

        let Some(stored) = self.records.get(key) else {
            return Ok(0);
        };

        let count = match &stored.record {
            CounterRecord::Log { events, .. } => events
                .range(now_ms.saturating_sub(window_ms).saturating_add(1)..)
                .map(|(_, n)| u64::from(*n))
                .sum(),
            CounterRecord::Fixed {
                count,
                window_start_ms,
            } => {
                if now_ms.saturating_sub(*window_start_ms) >= window_ms {
                    0
                } else {
                    *count
                }
            }
        };

        Ok(count)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        tracing::info!(key = %key, "Rate limit reset");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn strategy(&self) -> WindowStrategy {
        self.strategy
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
