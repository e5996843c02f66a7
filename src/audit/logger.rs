use crate::audit::storage::AuditStorage;
use crate::config::AuditConfig;
use crate::domain::audit::{AuditRecord, PersistedAuditRecord};
use crate::errors::{AppError, Result};
use crate::observability::MetricsRecorder;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

/// Receiver of decision records
///
/// Calls must return without waiting on storage; failures stay inside the sink.
pub trait AuditSink: Send + Sync {
    fn record_decision(&self, record: AuditRecord);
}

/// Configuration for the audit logger
#[derive(Debug, Clone)]
pub struct AuditLoggerConfig {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub channel_buffer_size: usize,
}

impl Default for AuditLoggerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout_ms: 1000,
            channel_buffer_size: 10000,
        }
    }
}

impl From<&AuditConfig> for AuditLoggerConfig {
    fn from(config: &AuditConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_timeout_ms: config.flush_interval_ms.max(1),
            channel_buffer_size: config.channel_buffer_size.max(1),
        }
    }
}

/// Async audit logger with batching
pub struct AuditLogger {
    sender: mpsc::Sender<AuditRecord>,
}

impl AuditLogger {
    /// Create a new audit logger with the given storage backend and configuration
    pub fn new(storage: Arc<dyn AuditStorage>, config: AuditLoggerConfig) -> Self {
        Self::spawn(storage, config).0
    }

    /// Like `new`, also returning the processor task so shutdown can await the final flush
    pub fn spawn(storage: Arc<dyn AuditStorage>, config: AuditLoggerConfig) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.channel_buffer_size);

        // Spawn the background batch processor
        let handle = tokio::spawn(batch_processor(receiver, storage, config));

        (Self { sender }, handle)
    }

    /// Queue a record without waiting; fails when the channel is full or closed
    pub fn try_log(&self, record: AuditRecord) -> Result<()> {
        self.sender.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => AppError::Internal("Audit queue is full".to_string()),
            TrySendError::Closed(_) => AppError::Internal("Audit queue is closed".to_string()),
        })
    }

    /// Number of records waiting in the channel (for monitoring)
    pub fn queue_size(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

impl AuditSink for AuditLogger {
    fn record_decision(&self, record: AuditRecord) {
        if let Err(e) = self.try_log(record) {
            MetricsRecorder::record_audit_dropped(1);
            warn!(error = %e, "Dropping audit record");
        }
    }
}

/// Background batch processor that accumulates records and writes them in batches
async fn batch_processor(
    mut receiver: mpsc::Receiver<AuditRecord>,
    storage: Arc<dyn AuditStorage>,
    config: AuditLoggerConfig,
) {
    let mut batch: Vec<AuditRecord> = Vec::with_capacity(config.batch_size);
    let mut flush_interval = interval(Duration::from_millis(config.batch_timeout_ms));

    info!(
        "Audit logger batch processor started (batch_size={}, timeout_ms={})",
        config.batch_size, config.batch_timeout_ms
    );

    loop {
        tokio::select! {
            maybe_record = receiver.recv() => {
                match maybe_record {
                    Some(record) => {
                        batch.push(record);

                        if batch.len() >= config.batch_size {
                            flush_batch(&mut batch, &storage).await;
                        }
                    }
                    // Channel closed, flush remaining records and exit
                    None => {
                        if !batch.is_empty() {
                            warn!("Audit logger channel closed, flushing remaining records");
                            flush_batch(&mut batch, &storage).await;
                        }
                        break;
                    }
                }
            }

            // Flush on timeout even if batch is not full
            _ = flush_interval.tick() => {
                if !batch.is_empty() {
                    flush_batch(&mut batch, &storage).await;
                }
            }
        }
    }

    info!("Audit logger batch processor stopped");
}

/// Flush a batch of records to storage; a failed batch is dropped and counted
async fn flush_batch(batch: &mut Vec<AuditRecord>, storage: &Arc<dyn AuditStorage>) {
    let count = batch.len();
    let start = std::time::Instant::now();

    let persisted: Vec<PersistedAuditRecord> =
        batch.drain(..).map(PersistedAuditRecord::new).collect();

    match storage.write_batch(persisted).await {
        Ok(()) => {
            let duration = start.elapsed();
            tracing::debug!("Flushed {} audit records to storage in {:?}", count, duration);
            MetricsRecorder::record_audit_written(count, duration.as_secs_f64());
        }
        Err(e) => {
            error!("Failed to flush audit batch of {} records: {:?}", count, e);
            MetricsRecorder::record_audit_dropped(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::storage::InMemoryAuditStorage;
    use crate::domain::DecisionReason;
    use chrono::Utc;

    fn record(i: usize) -> AuditRecord {
        AuditRecord::new(
            format!("/api/item/{}", i),
            "user:1",
            i as u64,
            false,
            DecisionReason::WithinQuota,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_audit_logger_batching() {
        let storage = Arc::new(InMemoryAuditStorage::new());
        let config = AuditLoggerConfig {
            batch_size: 5,
            batch_timeout_ms: 10_000,
            channel_buffer_size: 100,
        };

        let logger = AuditLogger::new(storage.clone(), config);

        // Log 3 records (should not trigger batch flush yet)
        for i in 0..3 {
            logger.try_log(record(i)).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(storage.get_records().await.len(), 0, "Records should not be flushed yet");

        // Log 2 more records (should trigger batch flush at 5)
        for i in 3..5 {
            logger.try_log(record(i)).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(storage.get_records().await.len(), 5, "All 5 records should be flushed");
    }

    #[tokio::test]
    async fn test_audit_logger_timeout_flush() {
        let storage = Arc::new(InMemoryAuditStorage::new());
        let config = AuditLoggerConfig {
            batch_size: 100,
            batch_timeout_ms: 100,
            channel_buffer_size: 100,
        };

        let logger = AuditLogger::new(storage.clone(), config);

        for i in 0..2 {
            logger.record_decision(record(i));
        }

        // Wait for timeout to trigger flush
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(storage.get_records().await.len(), 2, "Records should be flushed after timeout");
    }

    #[tokio::test]
    async fn test_drop_flushes_remaining_records() {
        let storage = Arc::new(InMemoryAuditStorage::new());
        let config = AuditLoggerConfig {
            batch_size: 100,
            batch_timeout_ms: 60_000,
            channel_buffer_size: 100,
        };

        let (logger, handle) = AuditLogger::spawn(storage.clone(), config);
        logger.record_decision(record(1));
        drop(logger);

        handle.await.unwrap();
        assert_eq!(storage.get_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (sender, _receiver) = mpsc::channel(1);
        let logger = AuditLogger { sender };

        assert!(logger.try_log(record(1)).is_ok());
        assert!(logger.try_log(record(2)).is_err());
        // Sink never panics or blocks on a full queue
        logger.record_decision(record(3));
        assert_eq!(logger.queue_size(), 1);
    }
}
