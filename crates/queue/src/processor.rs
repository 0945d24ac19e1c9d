//! Batch-level downstream processing.
//!
//! A [`BatchProcessor`] receives the whole drained batch in one call. Because
//! deletes can fail after a successful call, the same message may reach a
//! processor more than once; implementations must tolerate duplicates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::batch::{Batch, ProcessedBatch};
use crate::error::BatchError;
use crate::parser::parse_batch;

/// Downstream side effect applied once per batch.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, batch: &Batch) -> anyhow::Result<()>;

    fn name(&self) -> &str;
}

#[async_trait]
impl<T: BatchProcessor + ?Sized> BatchProcessor for std::sync::Arc<T> {
    async fn process(&self, batch: &Batch) -> anyhow::Result<()> {
        (**self).process(batch).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Run `processor` over `batch`.
///
/// The returned [`ProcessedBatch`] is the only way to reach
/// [`acknowledge`](crate::ack::acknowledge), so nothing can be deleted before
/// processing has succeeded.
pub async fn process_batch<P>(processor: &P, batch: Batch) -> Result<ProcessedBatch, BatchError>
where
    P: BatchProcessor + ?Sized,
{
    match processor.process(&batch).await {
        Ok(()) => Ok(ProcessedBatch::new(batch)),
        Err(source) => Err(BatchError::Processing {
            batch_size: batch.len(),
            source,
        }),
    }
}

// ── LogProcessor ─────────────────────────────────────────────

/// Reports the batch to the log and nothing else.
#[derive(Debug, Default)]
pub struct LogProcessor;

impl LogProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BatchProcessor for LogProcessor {
    async fn process(&self, batch: &Batch) -> anyhow::Result<()> {
        let (envelopes, errors) = parse_batch(batch.messages());

        let oldest = envelopes.iter().map(|e| e.sent_at).min();
        let newest = envelopes.iter().map(|e| e.sent_at).max();
        let max_lag_secs = oldest.map(|ts| (Utc::now() - ts).num_seconds());
        let redelivered = batch.iter().filter(|m| m.attempt_count > 1).count();

        info!(
            messages = batch.len(),
            pages = batch.pages(),
            unparseable = errors.len(),
            redelivered,
            oldest_sent_at = ?oldest,
            newest_sent_at = ?newest,
            max_lag_secs = ?max_lag_secs,
            "Processing {} messages... Done",
            batch.len()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

// ── MemorySink ───────────────────────────────────────────────

/// One record held by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRecord {
    pub body: String,
    /// How many times the message was delivered to the sink.
    pub deliveries: u32,
}

/// Idempotent in-memory downstream keyed by message id.
///
/// Replaying a message leaves the stored records as they were and only bumps
/// its delivery count and [`MemorySink::duplicates`].
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<String, SinkRecord>>,
    duplicates: AtomicUsize,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a downstream outage: every call fails until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Distinct messages stored.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(message_id)
    }

    pub fn record(&self, message_id: &str) -> Option<SinkRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message_id)
            .cloned()
    }

    /// Message ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Deliveries absorbed as duplicates.
    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }

    /// Number of `process` calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchProcessor for MemorySink {
    async fn process(&self, batch: &Batch) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("downstream unavailable, {} message(s) not delivered", batch.len());
        }

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        for msg in batch {
            match records.get_mut(&msg.id) {
                Some(existing) => {
                    existing.deliveries += 1;
                    self.duplicates.fetch_add(1, Ordering::SeqCst);
                }
                None => {
                    records.insert(
                        msg.id.clone(),
                        SinkRecord {
                            body: msg.body.clone(),
                            deliveries: 1,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests::{make_message, make_page};

    fn batch_of(messages: Vec<crate::client::QueueMessage>) -> Batch {
        let mut batch = Batch::new();
        batch.push(messages);
        batch
    }

    #[tokio::test]
    async fn test_replay_is_absorbed() {
        let sink = MemorySink::new();
        sink.process(&batch_of(make_page("a", 3))).await.unwrap();
        let before = sink.ids();

        // The same message comes back after a failed delete.
        sink.process(&batch_of(vec![make_message("a-1")])).await.unwrap();

        assert_eq!(sink.ids(), before);
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.duplicates(), 1);
        assert_eq!(sink.record("a-1").unwrap().deliveries, 2);
        assert_eq!(sink.record("a-0").unwrap().deliveries, 1);
    }

    #[tokio::test]
    async fn test_failing_sink_stores_nothing() {
        let sink = MemorySink::new();
        sink.set_failing(true);
        assert!(sink.process(&batch_of(make_page("a", 3))).await.is_err());
        assert!(sink.is_empty());
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn test_process_batch_wraps_failure() {
        let sink = MemorySink::new();
        sink.set_failing(true);
        let err = process_batch(&sink, batch_of(make_page("a", 4))).await.unwrap_err();
        assert!(matches!(err, BatchError::Processing { batch_size: 4, .. }));
        assert!(err.to_string().contains("downstream unavailable"));
    }

    #[tokio::test]
    async fn test_log_processor_accepts_unparseable_bodies() {
        let mut bad = make_message("bad");
        bad.body = "not json".to_string();
        let batch = batch_of(vec![make_message("good"), bad]);
        assert!(LogProcessor::new().process(&batch).await.is_ok());
    }
}
