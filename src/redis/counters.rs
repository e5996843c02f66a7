// Counter store backed by Redis; each update is one Lua script, so it is atomic on the server

use crate::config::{RedisConfig, StoreConfig};
use crate::domain::WindowStrategy;
use crate::errors::{AppError, Result};
use crate::rate_limit::store::{window_ms, CounterOutcome, CounterStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use redis::{aio::ConnectionManager, Client, Script};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use uuid::Uuid;

// Sorted set: score = event time in millis, member = unique event id
static SLIDING_LOG_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local key = KEYS[1]
        local now = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        local limit = tonumber(ARGV[3])
        local member = ARGV[4]

        -- Events with t + window <= now no longer count
        redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

        local current = redis.call('ZCARD', key)
        local admitted = 0

        if current < limit then
            redis.call('ZADD', key, now, member)
            redis.call('PEXPIRE', key, window)
            current = current + 1
            admitted = 1
        end

        local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
        local oldest_score = -1
        if #oldest > 0 then
            oldest_score = tonumber(oldest[2])
        end

        return {admitted, current, oldest_score}
        "#,
    )
});

// Hash with fields count and start (window start in millis)
static FIXED_WINDOW_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local key = KEYS[1]
        local now = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        local limit = tonumber(ARGV[3])

        local state = redis.call('HMGET', key, 'count', 'start')
        local count = tonumber(state[1]) or 0
        local start = tonumber(state[2]) or now

        if now - start >= window then
            count = 0
            start = now
        end

        if count >= limit then
            return {0, count, start}
        end

        count = count + 1
        redis.call('HSET', key, 'count', count, 'start', start)
        redis.call('PEXPIRE', key, window)

        return {1, count, start}
        "#,
    )
});

/// Redis-backed counter store with lazy (re)connection
///
/// The connection is established on first use. While Redis is unreachable,
/// connection attempts are spaced by the reconnect interval and calls in
/// between fail fast with `StoreUnavailable`.
pub struct RedisCounterStore {
    conn: Arc<Connection>,
    strategy: WindowStrategy,
    connect_timeout: Duration,
    reconnect_interval: Duration,
    last_connect_attempt: Mutex<Option<Instant>>,
}

/// Client and established manager, shared with background connect attempts
struct Connection {
    client: Client,
    manager: OnceCell<ConnectionManager>,
}

impl RedisCounterStore {
    pub fn new(redis: &RedisConfig, store: &StoreConfig) -> Result<Self> {
        Ok(Self {
            conn: Arc::new(Connection {
                client: crate::redis::open_client(redis)?,
                manager: OnceCell::new(),
            }),
            strategy: store.strategy,
            connect_timeout: Duration::from_secs(redis.connection_timeout_seconds),
            reconnect_interval: Duration::from_secs(store.reconnect_interval_seconds),
            last_connect_attempt: Mutex::new(None),
        })
    }

    /// Establish the connection now instead of on the first request
    pub async fn connect(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        if let Some(manager) = self.conn.manager.get() {
            return Ok(manager.clone());
        }

        // Claimed before awaiting, so a caller cut off by the engine's store
        // timeout still leaves the backoff in place
        if !self.claim_connect_attempt() {
            return Err(AppError::StoreUnavailable(
                "redis connection attempted recently, waiting before retrying".to_string(),
            ));
        }

        // Runs in its own task: dropping the caller does not abort the attempt
        let conn = self.conn.clone();
        let timeout = self.connect_timeout;
        let attempt = tokio::spawn(async move {
            conn.manager
                .get_or_try_init(|| crate::redis::connect(&conn.client, timeout))
                .await
                .map(|manager| manager.clone())
        });

        attempt
            .await
            .map_err(|e| AppError::Internal(format!("Redis connect task failed: {}", e)))?
    }

    fn claim_connect_attempt(&self) -> bool {
        let mut last = self
            .last_connect_attempt
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        if matches!(*last, Some(at) if at.elapsed() < self.reconnect_interval) {
            return false;
        }

        *last = Some(Instant::now());
        true
    }
}

fn parse_outcome(raw: Vec<i64>) -> Result<CounterOutcome> {
    match raw.as_slice() {
        [admitted, count, oldest] => Ok(CounterOutcome {
            admitted: *admitted == 1,
            count: (*count).max(0) as u64,
            oldest_in_window_ms: (*oldest >= 0).then_some(*oldest),
        }),
        other => Err(AppError::Internal(format!(
            "unexpected counter script reply: {:?}",
            other
        ))),
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get_and_update(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u64,
    ) -> Result<CounterOutcome> {
        let mut conn = self.connection().await?;
        let now_ms = now.timestamp_millis();
        let window_ms = window_ms(window);

        tracing::debug!(
            key = %key,
            limit = %limit,
            window_ms = %window_ms,
            strategy = self.strategy.as_str(),
            "Checking rate limit"
        );

        let raw: Vec<i64> = match self.strategy {
            WindowStrategy::SlidingLog => {
                let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());
                SLIDING_LOG_SCRIPT
                    .key(key)
                    .arg(now_ms)
                    .arg(window_ms)
                    .arg(limit)
                    .arg(member)
                    .invoke_async(&mut conn)
                    .await?
            }
            WindowStrategy::FixedWindow => {
                FIXED_WINDOW_SCRIPT
                    .key(key)
                    .arg(now_ms)
                    .arg(window_ms)
                    .arg(limit)
                    .invoke_async(&mut conn)
                    .await?
            }
        };

        let outcome = parse_outcome(raw)?;

        tracing::debug!(
            key = %key,
            admitted = %outcome.admitted,
            count = %outcome.count,
            "Rate limit check result"
        );

        Ok(outcome)
    }

    async fn current_count(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Result<u64> {
        let mut conn = self.connection().await?;
        let now_ms = now.timestamp_millis();
        let window_ms = window_ms(window);

        match self.strategy {
            WindowStrategy::SlidingLog => {
                let count: u64 = redis::cmd("ZCOUNT")
                    .arg(key)
                    .arg(format!("({}", now_ms - window_ms))
                    .arg("+inf")
                    .query_async(&mut conn)
                    .await?;
                Ok(count)
            }
            WindowStrategy::FixedWindow => {
                let (count, start): (Option<u64>, Option<i64>) = redis::cmd("HMGET")
                    .arg(key)
                    .arg("count")
                    .arg("start")
                    .query_async(&mut conn)
                    .await?;
                match (count, start) {
                    (Some(count), Some(start)) if now_ms - start < window_ms => Ok(count),
                    _ => Ok(0),
                }
            }
        }
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;

        tracing::info!(key = %key, "Rate limit reset");

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        crate::redis::health_check(&mut conn).await
    }

    fn strategy(&self) -> WindowStrategy {
        self.strategy
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
