use ratekeeper::{
    api::{create_router, AppState, RouterOptions},
    audit::{AuditLogger, AuditLoggerConfig, AuditStorage, FileAuditStorage, LogAuditStorage, MultiBackendStorage},
    config::{AuditBackend, AuditConfig, Config, StoreBackend},
    observability::{init_tracing, HealthChecker},
    rate_limit::{Clock, CounterStore, InMemoryCounterStore, LimiterEngine, QuotaResolver, StaticAccessList, SystemClock},
    redis::RedisCounterStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing/logging
    init_tracing(&config.observability)?;

    tracing::info!("Starting ratekeeper");
    tracing::info!("Configuration loaded: {:?}", config.server);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = build_store(&config, clock.clone()).await?;
    tracing::info!(
        "Counter store: {} ({})",
        store.name(),
        store.strategy().as_str()
    );

    let resolver = QuotaResolver::from_config(&config.rate_limit);
    tracing::info!(
        "Quota rules loaded: {} rules, default {}/{}s",
        resolver.rules().len(),
        config.rate_limit.default.limit,
        config.rate_limit.default.window_seconds
    );

    let access = Arc::new(StaticAccessList::from_config(&config.access_lists));

    let mut engine = LimiterEngine::new(store.clone(), resolver, access, clock)
        .with_failure_policy(config.store.failure_policy)
        .with_store_timeout(Duration::from_millis(config.store.timeout_ms));

    let audit_task = match build_audit_storage(&config.audit) {
        Some(storage) => {
            let (logger, handle) = AuditLogger::spawn(storage, AuditLoggerConfig::from(&config.audit));
            engine = engine.with_audit_sink(Arc::new(logger));
            Some(handle)
        }
        None => {
            tracing::warn!("Audit logging disabled");
            None
        }
    };

    let health_checker = Arc::new(HealthChecker::new(store, config.store.failure_policy));
    let state = AppState::new(Arc::new(engine), health_checker);
    let app = create_router(state, RouterOptions::from(&config));

    // Bind server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    // The router owned the last audit sender; wait for the final flush
    if let Some(handle) = audit_task {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            tracing::warn!("Audit logger did not flush before shutdown deadline");
        }
    }

    tracing::info!("ratekeeper stopped");

    Ok(())
}

async fn build_store(config: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisCounterStore::new(&config.redis, &config.store)?;

            // An unreachable Redis is not fatal; requests follow the failure policy
            // until a reconnect succeeds
            match store.connect().await {
                Ok(()) => tracing::info!("Redis counter store ready"),
                Err(e) => tracing::error!(
                    "Redis unavailable at startup, applying {:?} until it recovers: {}",
                    config.store.failure_policy,
                    e
                ),
            }

            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryCounterStore::new(config.store.strategy));
            store.spawn_sweeper(clock, Duration::from_secs(config.store.sweep_interval_seconds.max(1)));
            tracing::info!("In-memory counter store ready");
            Ok(store)
        }
    }
}

fn build_audit_storage(config: &AuditConfig) -> Option<Arc<dyn AuditStorage>> {
    if !config.enabled {
        return None;
    }

    let mut storage = MultiBackendStorage::new();
    for backend in &config.backends {
        storage = match backend {
            AuditBackend::Log => storage.add_backend(Box::new(LogAuditStorage)),
            AuditBackend::File => match config.file_path.as_deref() {
                Some(path) => storage.add_backend(Box::new(FileAuditStorage::new(path))),
                None => storage,
            },
        };
    }

    if storage.is_empty() {
        return None;
    }

    Some(Arc::new(storage))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
