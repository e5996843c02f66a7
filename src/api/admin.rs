use crate::domain::NORMAL_TIER;
use crate::errors::{AppError, Result};
use crate::rate_limit::LimiterEngine;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Subject and path whose counter is addressed
#[derive(Debug, Deserialize)]
pub struct CounterQuery {
    pub identifier: String,
    pub path: String,
    #[serde(default)]
    pub tier: Option<String>,
}

impl CounterQuery {
    fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(AppError::ValidationError("identifier must not be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(AppError::ValidationError("path must start with '/'".to_string()));
        }
        Ok(())
    }

    fn tier(&self) -> &str {
        self.tier.as_deref().unwrap_or(NORMAL_TIER)
    }
}

/// GET /admin/counters - Current count for a subject on a path
#[tracing::instrument(skip(engine))]
pub async fn get_counter(
    State(engine): State<Arc<LimiterEngine>>,
    Query(query): Query<CounterQuery>,
) -> Result<Json<Value>> {
    query.validate()?;

    let count = engine
        .current_count(&query.identifier, &query.path, query.tier())
        .await?;

    Ok(Json(json!({
        "identifier": query.identifier,
        "path": query.path,
        "tier": query.tier(),
        "count": count,
    })))
}

/// DELETE /admin/counters - Clear the counter for a subject on a path
#[tracing::instrument(skip(engine))]
pub async fn reset_counter(
    State(engine): State<Arc<LimiterEngine>>,
    Query(query): Query<CounterQuery>,
) -> Result<StatusCode> {
    query.validate()?;

    engine
        .reset(&query.identifier, &query.path, query.tier())
        .await?;

    tracing::info!(
        identifier = %query.identifier,
        path = %query.path,
        "Counter reset by admin"
    );

    Ok(StatusCode::NO_CONTENT)
}
