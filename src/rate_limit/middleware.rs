use crate::rate_limit::evaluation::EvaluationResult;
use crate::rate_limit::identity::{AuthenticatedPrincipal, RequestContext};
use crate::domain::{KeyScope, Quota};
use crate::rate_limit::limiter::LimiterEngine;
use crate::rate_limit::resolver::{QuotaResolver, QuotaRule};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_PRINCIPAL_ID: &str = "x-principal-id";
pub const X_PRINCIPAL_TIER: &str = "x-principal-tier";

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(engine): State<Arc<LimiterEngine>>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = request_context(&request);
    let result = engine.evaluate(&ctx).await;

    if !result.admitted() {
        return rejection_response(&result);
    }

    // Add rate limit headers to response
    let mut response = next.run(request).await;
    result.apply_headers(response.headers_mut());

    response
}

/// Fixed quota attached to individual routes instead of a prefix rule
///
/// Counters live under `rate:route:{name}`, apart from the prefix rules, so
/// a route can carry both without the two sharing a record.
#[derive(Clone)]
pub struct RouteLimit {
    engine: Arc<LimiterEngine>,
    name: String,
    quota: Quota,
    rule: QuotaRule,
    resolver: Arc<QuotaResolver>,
}

impl RouteLimit {
    pub fn new(engine: Arc<LimiterEngine>, name: impl Into<String>, quota: Quota) -> Self {
        let name = name.into();
        let rule = QuotaRule::single("/", quota);
        let resolver = Arc::new(route_resolver(&name, &rule, quota));

        Self {
            engine,
            name,
            quota,
            rule,
            resolver,
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>, quota: Quota) -> Self {
        self.rule = self.rule.with_tier(tier, quota);
        self.rebuild();
        self
    }

    pub fn with_scope(mut self, scope: KeyScope) -> Self {
        self.rule = self.rule.with_scope(scope);
        self.rebuild();
        self
    }

    fn rebuild(&mut self) {
        self.resolver = Arc::new(route_resolver(&self.name, &self.rule, self.quota));
    }
}

fn route_resolver(name: &str, rule: &QuotaRule, default: Quota) -> QuotaResolver {
    QuotaResolver::new(default, vec![rule.clone()]).with_namespace(format!("rate:route:{}", name))
}

/// Rate limiting middleware for a `RouteLimit`
pub async fn route_rate_limit_middleware(
    State(limit): State<RouteLimit>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = request_context(&request);
    let result = limit.engine.evaluate_with(&ctx, &limit.resolver).await;

    if !result.admitted() {
        return rejection_response(&result);
    }

    let mut response = next.run(request).await;
    result.apply_headers(response.headers_mut());

    response
}

/// Build the evaluation inputs from the request extensions and headers
pub fn request_context(request: &Request) -> RequestContext {
    let mut ctx = RequestContext::new(request.uri().path());

    if let Some(principal) = request.extensions().get::<AuthenticatedPrincipal>() {
        ctx = ctx.with_principal(principal.clone());
    }

    if let Some(forwarded_for) = header_str(request.headers(), X_FORWARDED_FOR) {
        ctx = ctx.with_forwarded_for(forwarded_for);
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        ctx = ctx.with_peer_addr(*addr);
    }

    ctx
}

fn rejection_response(result: &EvaluationResult) -> Response {
    let status = result.status();
    let body = Json(json!({
        "detail": result.detail(),
        "status": status.as_u16(),
    }));

    let mut response = (status, body).into_response();
    result.apply_headers(response.headers_mut());
    response
}

/// Turns principal headers set by a trusted authenticating gateway into a request extension
pub async fn principal_from_headers(mut request: Request, next: Next) -> Response {
    if let Some(id) = header_str(request.headers(), X_PRINCIPAL_ID) {
        let mut principal = AuthenticatedPrincipal::new(id);
        if let Some(tier) = header_str(request.headers(), X_PRINCIPAL_TIER) {
            principal = principal.with_tier(tier);
        }
        request.extensions_mut().insert(principal);
    }

    next.run(request).await
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
