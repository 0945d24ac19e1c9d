//! Queue client trait and message type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A single delivery of a message received from a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body. Opaque to the consumer; producers send a JSON
    /// envelope with a `sentAt` timestamp.
    pub body: String,
    /// Token that authorizes deletion of this delivery (SQS receipt handle).
    ///
    /// Valid only until the visibility timeout runs out. A redelivery carries
    /// a new handle and the old one stops working.
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub timestamp: DateTime<Utc>,
    /// Number of times this message has been received, this delivery included.
    pub attempt_count: u32,
}

/// Operations the batch consumer needs from a queue backend.
///
/// Passed into [`BatchConsumer`](crate::BatchConsumer) explicitly so tests can
/// swap in [`MemoryQueue`](crate::MemoryQueue).
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Approximate number of visible, undelivered messages.
    ///
    /// `Ok(None)` means the backend answered but the count was missing or
    /// unreadable.
    async fn approximate_depth(&self) -> Result<Option<u64>, QueueError>;

    /// Receive up to `max_messages` from the queue.
    ///
    /// Best effort: may return fewer than requested even when more are
    /// available. Returns an empty vec if nothing was delivered.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete one delivery. Fails if the receipt handle is no longer valid.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Provider name for logs (e.g. "sqs", "memory").
    fn provider(&self) -> &str;
}

#[async_trait]
impl<T: QueueClient + ?Sized> QueueClient for std::sync::Arc<T> {
    async fn approximate_depth(&self) -> Result<Option<u64>, QueueError> {
        (**self).approximate_depth().await
    }

    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        (**self).poll_batch(max_messages).await
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        (**self).ack(receipt_handle).await
    }

    fn provider(&self) -> &str {
        (**self).provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_message_serde_roundtrip() {
        let msg = QueueMessage {
            id: "msg-123".to_string(),
            body: r#"{"sentAt":"2024-03-01T10:00:00.000Z"}"#.to_string(),
            receipt_handle: "handle-abc".to_string(),
            timestamp: Utc::now(),
            attempt_count: 1,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let deserialized: QueueMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.id, deserialized.id);
        assert_eq!(msg.body, deserialized.body);
        assert_eq!(msg.receipt_handle, deserialized.receipt_handle);
        assert_eq!(msg.attempt_count, deserialized.attempt_count);
    }
}
