use crate::domain::{Decision, DecisionReason};
use axum::http::{
    header::{HeaderName, RETRY_AFTER},
    HeaderMap, HeaderValue, StatusCode,
};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Decision translated for the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    pub identifier: String,
    pub decision: Decision,
}

impl EvaluationResult {
    pub fn new(identifier: String, decision: Decision) -> Self {
        Self {
            identifier,
            decision,
        }
    }

    pub fn admitted(&self) -> bool {
        self.decision.admitted
    }

    /// Status to answer with; 200 means forward the request
    pub fn status(&self) -> StatusCode {
        match self.decision.reason {
            DecisionReason::Denied => StatusCode::FORBIDDEN,
            DecisionReason::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            DecisionReason::StoreFailClosed => StatusCode::SERVICE_UNAVAILABLE,
            DecisionReason::Allowlisted
            | DecisionReason::WithinQuota
            | DecisionReason::StoreFailOpen => StatusCode::OK,
        }
    }

    /// Message for rejection bodies
    pub fn detail(&self) -> &'static str {
        match self.decision.reason {
            DecisionReason::Denied => "Access denied.",
            DecisionReason::QuotaExceeded => "Rate limit exceeded.",
            DecisionReason::StoreFailClosed => "Rate limiting temporarily unavailable.",
            _ => "OK",
        }
    }

    /// Rate limit headers for this decision
    ///
    /// Deny-list blocks, allow-list bypasses and fail-closed rejections carry none.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.apply_headers(&mut headers);
        headers
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let decision = &self.decision;

        if matches!(
            decision.reason,
            DecisionReason::Denied | DecisionReason::Allowlisted | DecisionReason::StoreFailClosed
        ) {
            return;
        }

        if let Some(limit) = decision.limit {
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
        }

        if let Some(remaining) = decision.remaining {
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
        }

        if decision.reason == DecisionReason::QuotaExceeded {
            headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_seconds));
        }
    }
}
