pub mod audit;
pub mod decision;
pub mod quota;

pub use audit::{AuditRecord, PersistedAuditRecord};
pub use decision::{Decision, DecisionReason};
pub use quota::{FailurePolicy, KeyScope, Quota, WindowStrategy, NORMAL_TIER};
