//! Per-message acknowledgment after a batch has been processed.
//!
//! Every message is deleted on its own. A failed delete is reported and the
//! rest carry on; the message stays in the queue and is processed again in a
//! later batch even though its effect was already applied.
//!
//! Known limitation: this at-least-once leak is accepted, not fixed.
//! Downstream processing must be idempotent or tolerate duplicates. Closing
//! the gap would need the batch staged to durable storage before deleting.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::batch::ProcessedBatch;
use crate::client::QueueClient;

/// A delete that did not go through.
#[derive(Debug, Clone, Serialize)]
pub struct AckFailure {
    pub message_id: String,
    pub receipt_handle: String,
    pub error: String,
}

/// Result of acknowledging one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AckReport {
    pub acked: usize,
    pub failures: Vec<AckFailure>,
}

impl AckReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Delete every message of `batch`, up to `concurrency` at a time.
///
/// Deletes are issued in batch order; with `concurrency == 1` they run one
/// after another. Failures never abort the remaining deletes.
pub async fn acknowledge<Q>(client: &Q, batch: &ProcessedBatch, concurrency: usize) -> AckReport
where
    Q: QueueClient + ?Sized,
{
    let results: Vec<_> = stream::iter(batch.iter())
        .map(|msg| async move { (msg, client.ack(&msg.receipt_handle).await) })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = AckReport::default();
    for (msg, result) in results {
        match result {
            Ok(()) => {
                debug!(message_id = %msg.id, "Message acknowledged");
                report.acked += 1;
            }
            Err(e) => {
                warn!(
                    message_id = %msg.id,
                    attempt = msg.attempt_count,
                    error = %e,
                    "Failed to delete processed message; it will be redelivered and processed again"
                );
                report.failures.push(AckFailure {
                    message_id: msg.id.clone(),
                    receipt_handle: msg.receipt_handle.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    report
}
