use crate::{
    api::{admin, health},
    config::Config,
    domain::Quota,
    observability::{HealthChecker, MetricsRecorder},
    rate_limit::{
        principal_from_headers, rate_limit_middleware, route_rate_limit_middleware, LimiterEngine,
        RouteLimit,
    },
};
use axum::{
    extract::{FromRef, Request},
    middleware::{from_fn, from_fn_with_state, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub engine: Arc<LimiterEngine>,
    pub health_checker: Arc<HealthChecker>,
}

impl AppState {
    pub fn new(engine: Arc<LimiterEngine>, health_checker: Arc<HealthChecker>) -> Self {
        Self {
            engine,
            health_checker,
        }
    }
}

/// Router switches taken from configuration
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    pub trust_principal_headers: bool,
    pub metrics_enabled: bool,
    pub admin_enabled: bool,
}

impl From<&Config> for RouterOptions {
    fn from(config: &Config) -> Self {
        Self {
            trust_principal_headers: config.server.trust_principal_headers,
            metrics_enabled: config.observability.metrics_enabled,
            admin_enabled: config.server.admin_enabled,
        }
    }
}

pub fn create_router(state: AppState, options: RouterOptions) -> Router {
    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Health endpoints are never rate limited
    let mut router = Router::new()
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    if options.metrics_enabled {
        router = router.route("/metrics", get(health::metrics));
    }

    if options.admin_enabled {
        router = router.route(
            "/admin/counters",
            get(admin::get_counter).delete(admin::reset_counter),
        );
    }

    router
        .merge(limited_routes(state.engine.clone(), options.trust_principal_headers))
        .layer(from_fn(track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Quota of `/api/greeting`, independent of the prefix rules
const GREETING_QUOTA: Quota = Quota {
    limit: 10,
    window_seconds: 60,
};
const GREETING_PREMIUM_QUOTA: Quota = Quota {
    limit: 40,
    window_seconds: 60,
};

fn limited_routes(engine: Arc<LimiterEngine>, trust_principal_headers: bool) -> Router<AppState> {
    let greeting_limit = RouteLimit::new(engine.clone(), "greeting", GREETING_QUOTA)
        .with_tier("premium", GREETING_PREMIUM_QUOTA);

    let greeting = Router::new()
        .route("/api/greeting", get(hello))
        .route_layer(from_fn_with_state(greeting_limit, route_rate_limit_middleware));

    let router = Router::new()
        .route("/api/hello", get(hello))
        .route("/api/fast/hello", get(hello))
        .route("/api/slow/hello", get(hello))
        .route_layer(from_fn_with_state(engine, rate_limit_middleware))
        .merge(greeting);

    // Principal headers must be attached before the limiter reads them
    if trust_principal_headers {
        router.route_layer(from_fn(principal_from_headers))
    } else {
        router
    }
}

async fn hello() -> Json<Value> {
    Json(json!({ "message": "Hello, world!" }))
}

async fn track_http_metrics(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;
    MetricsRecorder::record_http_request(method.as_str(), response.status().as_u16());
    response
}
