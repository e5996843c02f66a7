use crate::audit::AuditSink;
use crate::domain::{AuditRecord, Decision, FailurePolicy};
use crate::errors::{AppError, Result};
use crate::observability::MetricsRecorder;
use crate::rate_limit::access_list::AccessList;
use crate::rate_limit::clock::Clock;
use crate::rate_limit::evaluation::EvaluationResult;
use crate::rate_limit::identity::RequestContext;
use crate::rate_limit::resolver::QuotaResolver;
use crate::rate_limit::store::{CounterOutcome, CounterStore};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Admission decision core
///
/// Checks the deny list, then the allow list, then resolves the quota and
/// performs one atomic counter update. Every call emits one audit record.
pub struct LimiterEngine {
    store: Arc<dyn CounterStore>,
    resolver: QuotaResolver,
    access: Arc<dyn AccessList>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<dyn AuditSink>>,
    failure_policy: FailurePolicy,
    store_timeout: Duration,
    store_healthy: AtomicBool,
}

impl LimiterEngine {
    pub fn new(
        store: Arc<dyn CounterStore>,
        resolver: QuotaResolver,
        access: Arc<dyn AccessList>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            resolver,
            access,
            clock,
            audit: None,
            failure_policy: FailurePolicy::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            store_healthy: AtomicBool::new(true),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Upper bound on one counter update
    ///
    /// A Redis script that commits just as the bound expires still counts its
    /// event, so under fail-closed a request can be answered 503 yet use up a
    /// slot. Keep the bound well above a normal script round-trip.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Whether the last store interaction succeeded
    pub fn store_healthy(&self) -> bool {
        self.store_healthy.load(Ordering::Acquire)
    }

    /// Evaluate an inbound request at the clock's current time
    pub async fn evaluate(&self, ctx: &RequestContext) -> EvaluationResult {
        self.evaluate_with(ctx, &self.resolver).await
    }

    /// Like `evaluate`, with quotas taken from `resolver` instead of the engine's rules
    pub async fn evaluate_with(&self, ctx: &RequestContext, resolver: &QuotaResolver) -> EvaluationResult {
        let identifier = ctx.identifier();
        let decision = self
            .decide_with(resolver, &identifier, &ctx.path, ctx.tier(), self.clock.now())
            .await;

        EvaluationResult::new(identifier, decision)
    }

    /// Decide whether to admit a request for `identifier` on `path` at `now`
    pub async fn decide(
        &self,
        identifier: &str,
        path: &str,
        tier: &str,
        now: DateTime<Utc>,
    ) -> Decision {
        self.decide_with(&self.resolver, identifier, path, tier, now)
            .await
    }

    async fn decide_with(
        &self,
        resolver: &QuotaResolver,
        identifier: &str,
        path: &str,
        tier: &str,
        now: DateTime<Utc>,
    ) -> Decision {
        let decision = self
            .decide_inner(resolver, identifier, path, tier, now)
            .await;

        MetricsRecorder::record_decision(decision.reason.as_str());
        if let Some(sink) = &self.audit {
            sink.record_decision(AuditRecord::from_decision(path, identifier, &decision, now));
        }

        decision
    }

    async fn decide_inner(
        &self,
        resolver: &QuotaResolver,
        identifier: &str,
        path: &str,
        tier: &str,
        now: DateTime<Utc>,
    ) -> Decision {
        if self.access.is_denied(identifier) {
            warn!(identifier = %identifier, path = %path, "Request from denied identifier");
            return Decision::denied();
        }

        if self.access.is_allowed(identifier) {
            debug!(identifier = %identifier, path = %path, "Allow-listed identifier bypasses quota");
            return Decision::allowlisted();
        }

        let resolved = resolver.resolve(path, tier);
        let limit = resolved.quota.limit;
        let window = resolved.quota.window();
        let key = resolver.quota_key(&resolved, identifier, path);

        match self.update_counter(&key, now, window, limit).await {
            Ok(outcome) => {
                self.mark_store_healthy();

                if outcome.admitted {
                    Decision::within_quota(limit, outcome.count)
                } else {
                    let retry_after = outcome.retry_after_seconds(now, window);
                    warn!(
                        identifier = %identifier,
                        path = %path,
                        limit = %limit,
                        current = %outcome.count,
                        retry_after = %retry_after,
                        "Rate limit exceeded"
                    );
                    Decision::quota_exceeded(limit, outcome.count, retry_after)
                }
            }
            Err(e) => {
                self.mark_store_failed(&e);
                match self.failure_policy {
                    FailurePolicy::FailOpen => Decision::fail_open(limit),
                    FailurePolicy::FailClosed => Decision::fail_closed(),
                }
            }
        }
    }

    async fn update_counter(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u64,
    ) -> Result<CounterOutcome> {
        tokio::time::timeout(
            self.store_timeout,
            self.store.get_and_update(key, now, window, limit),
        )
        .await
        .map_err(|_| AppError::StoreTimeout(self.store_timeout.as_millis() as u64))?
    }

    /// Logged once per healthy -> failing transition, not per request
    fn mark_store_failed(&self, err: &AppError) {
        MetricsRecorder::record_store_error(err.kind());

        if self.store_healthy.swap(false, Ordering::AcqRel) {
            error!(
                store = self.store.name(),
                policy = ?self.failure_policy,
                error = %err,
                "Counter store unavailable, applying failure policy"
            );
        } else {
            debug!(store = self.store.name(), error = %err, "Counter store still unavailable");
        }
    }

    fn mark_store_healthy(&self) {
        if !self.store_healthy.swap(true, Ordering::AcqRel) {
            info!(store = self.store.name(), "Counter store recovered");
        }
    }

    /// Events counted for the subject's key on `path` right now
    pub async fn current_count(&self, identifier: &str, path: &str, tier: &str) -> Result<u64> {
        let resolved = self.resolver.resolve(path, tier);
        let key = self.resolver.quota_key(&resolved, identifier, path);
        self.store
            .current_count(&key, self.clock.now(), resolved.quota.window())
            .await
    }

    /// Clear the counter for the subject's key on `path`
    pub async fn reset(&self, identifier: &str, path: &str, tier: &str) -> Result<()> {
        let resolved = self.resolver.resolve(path, tier);
        self.store
            .reset(&self.resolver.quota_key(&resolved, identifier, path))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DecisionReason, KeyScope, Quota, WindowStrategy, NORMAL_TIER};
    use crate::rate_limit::access_list::StaticAccessList;
    use crate::rate_limit::clock::MockClock;
    use crate::rate_limit::memory::InMemoryCounterStore;
    use crate::rate_limit::resolver::QuotaRule;
    use crate::rate_limit::store::UnavailableStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl RecordingSink {
        fn records(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl AuditSink for RecordingSink {
        fn record_decision(&self, record: AuditRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    /// Store that commits the update, then replies late
    struct SlowReplyStore {
        inner: InMemoryCounterStore,
        delay: Duration,
    }

    #[async_trait]
    impl CounterStore for SlowReplyStore {
        async fn get_and_update(
            &self,
            key: &str,
            now: DateTime<Utc>,
            window: Duration,
            limit: u64,
        ) -> Result<CounterOutcome> {
            let outcome = self.inner.get_and_update(key, now, window, limit).await;
            tokio::time::sleep(self.delay).await;
            outcome
        }

        async fn current_count(&self, key: &str, now: DateTime<Utc>, window: Duration) -> Result<u64> {
            self.inner.current_count(key, now, window).await
        }

        async fn reset(&self, key: &str) -> Result<()> {
            self.inner.reset(key).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn strategy(&self) -> WindowStrategy {
            self.inner.strategy()
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    /// Store whose update never completes
    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn get_and_update(
            &self,
            _key: &str,
            _now: DateTime<Utc>,
            _window: Duration,
            _limit: u64,
        ) -> Result<CounterOutcome> {
            futures::future::pending().await
        }

        async fn current_count(&self, _key: &str, _now: DateTime<Utc>, _window: Duration) -> Result<u64> {
            Ok(0)
        }

        async fn reset(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn strategy(&self) -> WindowStrategy {
            WindowStrategy::SlidingLog
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    struct Fixture {
        engine: Arc<LimiterEngine>,
        clock: MockClock,
        access: Arc<StaticAccessList>,
        sink: Arc<RecordingSink>,
    }

    fn resolver() -> QuotaResolver {
        QuotaResolver::new(
            Quota::new(3, 60),
            vec![
                QuotaRule::single("/api/", Quota::new(100, 60)),
                QuotaRule::single("/api/slow/", Quota::new(50, 60)),
                QuotaRule::new(
                    "/api/shared/",
                    KeyScope::PerIdentifier,
                    HashMap::from([(NORMAL_TIER.to_string(), Quota::new(2, 60))]),
                ),
                QuotaRule::single("/api/team/", Quota::new(2, 30)).with_scope(KeyScope::PerIdentifier),
            ],
        )
    }

    fn fixture_with(store: Arc<dyn CounterStore>, policy: FailurePolicy) -> Fixture {
        let clock = MockClock::at_epoch();
        let access = Arc::new(StaticAccessList::new());
        let sink = Arc::new(RecordingSink::default());

        let engine = LimiterEngine::new(store, resolver(), access.clone(), Arc::new(clock.clone()))
            .with_audit_sink(sink.clone())
            .with_failure_policy(policy)
            .with_store_timeout(Duration::from_millis(50));

        Fixture {
            engine: Arc::new(engine),
            clock,
            access,
            sink,
        }
    }

    fn fixture(strategy: WindowStrategy) -> Fixture {
        fixture_with(
            Arc::new(InMemoryCounterStore::new(strategy)),
            FailurePolicy::FailOpen,
        )
    }

    async fn decide_now(f: &Fixture, identifier: &str, path: &str) -> Decision {
        f.engine
            .decide(identifier, path, NORMAL_TIER, f.clock.now())
            .await
    }

    #[tokio::test]
    async fn test_worked_example_sliding_log() {
        let f = fixture(WindowStrategy::SlidingLog);

        let mut remaining = Vec::new();
        for _ in 0..3 {
            let decision = decide_now(&f, "user:1", "/home").await;
            assert!(decision.admitted);
            remaining.push(decision.remaining.unwrap());
            f.clock.advance(Duration::from_secs(10));
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        let rejected = decide_now(&f, "user:1", "/home").await;
        assert!(!rejected.admitted);
        assert_eq!(rejected.reason, DecisionReason::QuotaExceeded);
        assert_eq!(rejected.remaining, Some(0));
        assert_eq!(rejected.retry_after_seconds, 30);
    }

    #[tokio::test]
    async fn test_retry_after_is_honoured() {
        for strategy in [WindowStrategy::SlidingLog, WindowStrategy::FixedWindow] {
            let f = fixture(strategy);
            for _ in 0..3 {
                assert!(decide_now(&f, "user:1", "/home").await.admitted);
                f.clock.advance(Duration::from_millis(7_250));
            }

            let rejected = decide_now(&f, "user:1", "/home").await;
            assert!(!rejected.admitted);
            assert!(rejected.retry_after_seconds > 0);

            f.clock
                .advance(Duration::from_secs(rejected.retry_after_seconds));
            let retried = decide_now(&f, "user:1", "/home").await;
            assert!(retried.admitted, "{:?} retry should be admitted", strategy);
        }
    }

    #[tokio::test]
    async fn test_rejections_never_mutate_count() {
        let f = fixture(WindowStrategy::SlidingLog);

        for _ in 0..3 {
            decide_now(&f, "user:1", "/home").await;
        }
        for _ in 0..4 {
            decide_now(&f, "user:1", "/home").await;
        }

        let count = f
            .engine
            .current_count("user:1", "/home", NORMAL_TIER)
            .await
            .unwrap();
        assert_eq!(count, 3);

        let records = f.sink.records();
        assert_eq!(records.len(), 7);
        assert!(records[3..].iter().all(|r| r.blocked && r.count == 3));
    }

    #[tokio::test]
    async fn test_deny_wins_over_allow_and_quota() {
        let f = fixture(WindowStrategy::SlidingLog);
        f.access.allow("user:9", None);
        f.access.deny("user:9", Some("abuse".to_string()));

        let decision = decide_now(&f, "user:9", "/home").await;
        assert!(!decision.admitted);
        assert_eq!(decision.reason, DecisionReason::Denied);
        assert_eq!(decision.remaining, Some(0));

        let count = f.engine.current_count("user:9", "/home", NORMAL_TIER).await.unwrap();
        assert_eq!(count, 0, "denied requests never touch the counter");

        let records = f.sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].blocked);
        assert_eq!(records[0].reason, DecisionReason::Denied);
    }

    #[tokio::test]
    async fn test_allow_list_bypasses_quota() {
        let f = fixture(WindowStrategy::SlidingLog);
        f.access.allow("user:vip", None);

        for _ in 0..10 {
            let decision = decide_now(&f, "user:vip", "/home").await;
            assert!(decision.admitted);
            assert_eq!(decision.reason, DecisionReason::Allowlisted);
            assert_eq!(decision.limit, None);
        }

        let count = f.engine.current_count("user:vip", "/home", NORMAL_TIER).await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(f.sink.records().len(), 10);
    }

    #[tokio::test]
    async fn test_longest_prefix_limit_reported() {
        let f = fixture(WindowStrategy::SlidingLog);
        let decision = decide_now(&f, "user:1", "/api/slow/x").await;
        assert_eq!(decision.limit, Some(50));
        assert_eq!(decision.remaining, Some(49));
    }

    #[tokio::test]
    async fn test_per_path_and_per_identifier_scopes() {
        let f = fixture(WindowStrategy::SlidingLog);

        // Default rule is per path: separate counters
        for path in ["/a", "/b", "/c", "/d"] {
            assert!(decide_now(&f, "user:1", path).await.admitted);
        }

        // Shared rule counts every path under the prefix together
        assert!(decide_now(&f, "user:1", "/api/shared/one").await.admitted);
        assert!(decide_now(&f, "user:1", "/api/shared/two").await.admitted);
        assert!(!decide_now(&f, "user:1", "/api/shared/three").await.admitted);
    }

    #[tokio::test]
    async fn test_shared_rules_keep_separate_counters() {
        let f = fixture(WindowStrategy::SlidingLog);

        assert!(decide_now(&f, "user:1", "/api/shared/one").await.admitted);
        assert!(decide_now(&f, "user:1", "/api/shared/two").await.admitted);
        assert!(!decide_now(&f, "user:1", "/api/shared/three").await.admitted);

        // Exhausting one shared rule leaves the other untouched
        let team = decide_now(&f, "user:1", "/api/team/x").await;
        assert!(team.admitted);
        assert_eq!(team.reason, DecisionReason::WithinQuota);
        assert_eq!(team.remaining, Some(1));

        // The 30s rule pruning its log does not revive the 60s rule
        f.clock.advance(Duration::from_secs(31));
        assert!(decide_now(&f, "user:1", "/api/team/y").await.admitted);
        assert!(!decide_now(&f, "user:1", "/api/shared/four").await.admitted);
    }

    #[tokio::test]
    async fn test_reset_clears_subject_counter() {
        let f = fixture(WindowStrategy::SlidingLog);

        for _ in 0..3 {
            assert!(decide_now(&f, "user:1", "/home").await.admitted);
        }
        assert!(!decide_now(&f, "user:1", "/home").await.admitted);

        f.engine.reset("user:1", "/home", NORMAL_TIER).await.unwrap();
        assert_eq!(f.engine.current_count("user:1", "/home", NORMAL_TIER).await.unwrap(), 0);
        assert!(decide_now(&f, "user:1", "/home").await.admitted);
    }

    #[tokio::test]
    async fn test_late_commit_under_fail_closed_is_still_counted() {
        let store = Arc::new(SlowReplyStore {
            inner: InMemoryCounterStore::new(WindowStrategy::SlidingLog),
            delay: Duration::from_millis(200),
        });
        let f = fixture_with(store, FailurePolicy::FailClosed);

        let decision = decide_now(&f, "user:1", "/home").await;
        assert_eq!(decision.reason, DecisionReason::StoreFailClosed);

        let count = f.engine.current_count("user:1", "/home", NORMAL_TIER).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_fail_open_admits_and_logs_transition() {
        let f = fixture_with(
            Arc::new(UnavailableStore::new(WindowStrategy::SlidingLog)),
            FailurePolicy::FailOpen,
        );

        let decision = decide_now(&f, "user:1", "/home").await;
        assert!(decision.admitted);
        assert_eq!(decision.reason, DecisionReason::StoreFailOpen);
        assert_eq!(decision.limit, Some(3));
        assert!(!f.engine.store_healthy());
    }

    #[tokio::test]
    async fn test_fail_closed_rejects() {
        let f = fixture_with(
            Arc::new(UnavailableStore::new(WindowStrategy::SlidingLog)),
            FailurePolicy::FailClosed,
        );

        let decision = decide_now(&f, "user:1", "/home").await;
        assert!(!decision.admitted);
        assert_eq!(decision.reason, DecisionReason::StoreFailClosed);
        assert!(f.sink.records()[0].blocked);
    }

    #[tokio::test]
    async fn test_store_timeout_applies_failure_policy() {
        let f = fixture_with(Arc::new(HangingStore), FailurePolicy::FailClosed);

        let decision = decide_now(&f, "user:1", "/home").await;
        assert_eq!(decision.reason, DecisionReason::StoreFailClosed);
        assert!(!f.engine.store_healthy());
    }

    #[tokio::test]
    async fn test_evaluate_derives_identifier() {
        let f = fixture(WindowStrategy::SlidingLog);
        let ctx = RequestContext::new("/home").with_forwarded_for("192.168.1.1, 10.0.0.1");

        let result = f.engine.evaluate(&ctx).await;
        assert_eq!(result.identifier, "ip:192.168.1.1");
        assert!(result.admitted());

        let records = f.sink.records();
        assert_eq!(records[0].identifier, "ip:192.168.1.1");
        assert_eq!(records[0].path, "/home");
        assert_eq!(records[0].count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_admit_exactly_limit() {
        let f = fixture(WindowStrategy::SlidingLog);
        let now = f.clock.now();

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let engine = f.engine.clone();
                tokio::spawn(async move {
                    engine.decide("user:1", "/home", NORMAL_TIER, now).await.admitted
                })
            })
            .collect();

        let admitted = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(admitted, 3);
        assert_eq!(f.sink.records().len(), 40);
    }
}
