use crate::domain::decision::{Decision, DecisionReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record of one admission decision, consumed by external audit storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub path: String,
    pub identifier: String,
    /// Counter value observed during the decision, not a later re-read
    pub count: u64,
    pub blocked: bool,
    pub reason: DecisionReason,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        path: impl Into<String>,
        identifier: impl Into<String>,
        count: u64,
        blocked: bool,
        reason: DecisionReason,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.into(),
            identifier: identifier.into(),
            count,
            blocked,
            reason,
            timestamp,
        }
    }

    /// Build the record for a decision made at `timestamp`
    pub fn from_decision(
        path: &str,
        identifier: &str,
        decision: &Decision,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            path,
            identifier,
            decision.count,
            decision.blocked(),
            decision.reason,
            timestamp,
        )
    }
}

/// Audit record as handed to storage backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAuditRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub record: AuditRecord,
}

impl PersistedAuditRecord {
    pub fn new(record: AuditRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
        }
    }
}
