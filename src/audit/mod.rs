pub mod logger;
pub mod storage;

pub use logger::{AuditLogger, AuditLoggerConfig, AuditSink};
pub use storage::{AuditStorage, FileAuditStorage, LogAuditStorage, MultiBackendStorage};
