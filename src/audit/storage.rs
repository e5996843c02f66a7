use crate::domain::audit::PersistedAuditRecord;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

/// Trait for audit record storage backends
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Write a batch of audit records to storage
    async fn write_batch(&self, records: Vec<PersistedAuditRecord>) -> Result<()>;
}

/// Emits each record as a structured event on the `audit` tracing target
#[derive(Debug, Default)]
pub struct LogAuditStorage;

#[async_trait]
impl AuditStorage for LogAuditStorage {
    async fn write_batch(&self, records: Vec<PersistedAuditRecord>) -> Result<()> {
        for persisted in records {
            let r = &persisted.record;
            info!(
                target: "audit",
                id = %persisted.id,
                path = %r.path,
                identifier = %r.identifier,
                count = r.count,
                blocked = r.blocked,
                reason = r.reason.as_str(),
                timestamp = %r.timestamp.to_rfc3339(),
                "rate limit decision"
            );
        }
        Ok(())
    }
}

/// Appends records as JSON lines to a file
#[derive(Debug)]
pub struct FileAuditStorage {
    path: PathBuf,
}

impl FileAuditStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditStorage for FileAuditStorage {
    async fn write_batch(&self, records: Vec<PersistedAuditRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buffer = Vec::with_capacity(records.len() * 160);
        for record in &records {
            serde_json::to_writer(&mut buffer, record)
                .map_err(|e| AppError::Internal(format!("Failed to encode audit record: {}", e)))?;
            buffer.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;

        Ok(())
    }
}

/// Multi-backend storage that can write to multiple destinations
pub struct MultiBackendStorage {
    backends: Vec<Box<dyn AuditStorage>>,
}

impl MultiBackendStorage {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    pub fn add_backend(mut self, backend: Box<dyn AuditStorage>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl Default for MultiBackendStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStorage for MultiBackendStorage {
    async fn write_batch(&self, records: Vec<PersistedAuditRecord>) -> Result<()> {
        if self.backends.is_empty() {
            return Err(AppError::Internal(
                "No storage backends configured".to_string(),
            ));
        }

        let mut failures = 0;
        for (idx, backend) in self.backends.iter().enumerate() {
            if let Err(e) = backend.write_batch(records.clone()).await {
                error!("Backend {} failed to write audit batch: {:?}", idx, e);
                failures += 1;
            }
        }

        // If at least one backend succeeded, we're OK
        if failures == self.backends.len() {
            return Err(AppError::Internal(
                "All storage backends failed to write audit records".to_string(),
            ));
        }

        Ok(())
    }
}

/// In-memory storage backend (for testing)
#[cfg(test)]
#[derive(Default)]
pub struct InMemoryAuditStorage {
    records: std::sync::Arc<tokio::sync::Mutex<Vec<PersistedAuditRecord>>>,
}

#[cfg(test)]
impl InMemoryAuditStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_records(&self) -> Vec<PersistedAuditRecord> {
        self.records.lock().await.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl AuditStorage for InMemoryAuditStorage {
    async fn write_batch(&self, records: Vec<PersistedAuditRecord>) -> Result<()> {
        self.records.lock().await.extend(records);
        Ok(())
    }
}
