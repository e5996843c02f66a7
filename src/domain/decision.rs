use serde::{Deserialize, Serialize};

/// Why the engine reached a decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Identifier is on the deny list
    Denied,
    /// Identifier is on the allow list, quota bypassed
    Allowlisted,
    /// Counter below the limit, event recorded
    WithinQuota,
    /// Counter at the limit, request rejected without mutation
    QuotaExceeded,
    /// Store unavailable, admitted by fail-open policy
    StoreFailOpen,
    /// Store unavailable, rejected by fail-closed policy
    StoreFailClosed,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Denied => "denied",
            DecisionReason::Allowlisted => "allowlisted",
            DecisionReason::WithinQuota => "within_quota",
            DecisionReason::QuotaExceeded => "quota_exceeded",
            DecisionReason::StoreFailOpen => "store_fail_open",
            DecisionReason::StoreFailClosed => "store_fail_closed",
        }
    }
}

/// Admission decision for a single request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub admitted: bool,
    pub reason: DecisionReason,
    /// Limit of the resolved quota; `None` when no quota applied
    pub limit: Option<u64>,
    /// Remaining requests in the window; `None` when unbounded
    pub remaining: Option<u64>,
    pub retry_after_seconds: u64,
    /// Counter value observed while deciding
    pub count: u64,
}

impl Decision {
    pub fn denied() -> Self {
        Self {
            admitted: false,
            reason: DecisionReason::Denied,
            limit: None,
            remaining: Some(0),
            retry_after_seconds: 0,
            count: 0,
        }
    }

    pub fn allowlisted() -> Self {
        Self {
            admitted: true,
            reason: DecisionReason::Allowlisted,
            limit: None,
            remaining: None,
            retry_after_seconds: 0,
            count: 0,
        }
    }

    pub fn within_quota(limit: u64, count: u64) -> Self {
        Self {
            admitted: true,
            reason: DecisionReason::WithinQuota,
            limit: Some(limit),
            remaining: Some(limit.saturating_sub(count)),
            retry_after_seconds: 0,
            count,
        }
    }

    pub fn quota_exceeded(limit: u64, count: u64, retry_after_seconds: u64) -> Self {
        Self {
            admitted: false,
            reason: DecisionReason::QuotaExceeded,
            limit: Some(limit),
            remaining: Some(0),
            retry_after_seconds,
            count,
        }
    }

    pub fn fail_open(limit: u64) -> Self {
        Self {
            admitted: true,
            reason: DecisionReason::StoreFailOpen,
            limit: Some(limit),
            remaining: Some(limit),
            retry_after_seconds: 0,
            count: 0,
        }
    }

    pub fn fail_closed() -> Self {
        Self {
            admitted: false,
            reason: DecisionReason::StoreFailClosed,
            limit: None,
            remaining: None,
            retry_after_seconds: 0,
            count: 0,
        }
    }

    /// Whether the rejection should be audited as blocked
    pub fn blocked(&self) -> bool {
        !self.admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_quota_remaining() {
        let decision = Decision::within_quota(3, 1);
        assert!(decision.admitted);
        assert_eq!(decision.remaining, Some(2));
        assert_eq!(decision.limit, Some(3));
    }

    #[test]
    fn test_denied_is_blocked() {
        let decision = Decision::denied();
        assert!(decision.blocked());
        assert_eq!(decision.remaining, Some(0));
        assert_eq!(decision.reason.as_str(), "denied");
    }

    #[test]
    fn test_allowlisted_is_unbounded() {
        let decision = Decision::allowlisted();
        assert!(decision.admitted);
        assert_eq!(decision.limit, None);
        assert_eq!(decision.remaining, None);
    }
}
