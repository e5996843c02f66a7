use crate::domain::FailurePolicy;
use crate::rate_limit::CounterStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChecks {
    pub counter_store: ComponentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub status: String,
    pub backend: String,
    pub strategy: String,
    pub message: Option<String>,
}

pub struct HealthChecker {
    store: Arc<dyn CounterStore>,
    failure_policy: FailurePolicy,
    ping_timeout: Duration,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn CounterStore>, failure_policy: FailurePolicy) -> Self {
        Self {
            store,
            failure_policy,
            ping_timeout: Duration::from_secs(1),
        }
    }

    /// Liveness check - is the service running?
    pub async fn liveness(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                counter_store: ComponentStatus {
                    status: "unknown".to_string(),
                    backend: self.store.name().to_string(),
                    strategy: self.store.strategy().as_str().to_string(),
                    message: None,
                },
            },
        }
    }

    /// Readiness check - can the service handle requests?
    ///
    /// A failing store only makes the service unready under fail-closed;
    /// fail-open keeps admitting traffic and reports "degraded".
    pub async fn readiness(&self) -> HealthStatus {
        let store_status = self.check_store().await;

        let overall_status = match (store_status.status.as_str(), self.failure_policy) {
            ("ok", _) => "ok",
            (_, FailurePolicy::FailOpen) => "degraded",
            (_, FailurePolicy::FailClosed) => "unavailable",
        };

        HealthStatus {
            status: overall_status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                counter_store: store_status,
            },
        }
    }

    async fn check_store(&self) -> ComponentStatus {
        let backend = self.store.name().to_string();
        let strategy = self.store.strategy().as_str().to_string();

        let message = match tokio::time::timeout(self.ping_timeout, self.store.ping()).await {
            Ok(Ok(())) => {
                return ComponentStatus {
                    status: "ok".to_string(),
                    backend,
                    strategy,
                    message: None,
                }
            }
            Ok(Err(e)) => format!("Counter store check failed: {}", e),
            Err(_) => format!("Counter store check timed out after {:?}", self.ping_timeout),
        };

        ComponentStatus {
            status: "error".to_string(),
            backend,
            strategy,
            message: Some(message),
        }
    }
}
