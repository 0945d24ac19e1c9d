//! Parse producer envelopes out of queue message bodies.
//!
//! The consumer itself treats bodies as opaque. Parsing here is only used by
//! processors that want to look inside, and a bad body never blocks the rest
//! of a batch.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::client::QueueMessage;
use crate::error::QueueError;

/// Well-known field names for the producer timestamp (tried in order).
const SENT_AT_KEYS: &[&str] = &[
    "sentAt", "sent_at",
    "timestamp", "Timestamp",
    "createdAt", "created_at",
    "time",
];

/// A parsed message body.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message_id: String,
    /// Producer timestamp, or the queue's sent timestamp when the body has none.
    pub sent_at: DateTime<Utc>,
    /// Whether `sent_at` came from the body.
    pub sent_at_in_body: bool,
    pub fields: Map<String, Value>,
}

/// Parse a single message body into an [`Envelope`].
///
/// Rejects bodies that are not valid JSON or not a JSON object. A missing or
/// unparseable timestamp falls back to the queue's sent time.
pub fn parse_envelope(msg: &QueueMessage) -> Result<Envelope, QueueError> {
    let json: Value = serde_json::from_str(&msg.body)
        .map_err(|e| QueueError::Parse(format!("Invalid JSON in message {}: {}", msg.id, e)))?;

    let Value::Object(fields) = json else {
        return Err(QueueError::Parse(format!(
            "Message {} body is not a JSON object",
            msg.id
        )));
    };

    let from_body = SENT_AT_KEYS
        .iter()
        .find_map(|k| fields.get(*k).and_then(|v| v.as_str()))
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|ts| ts.with_timezone(&Utc));

    Ok(Envelope {
        message_id: msg.id.clone(),
        sent_at: from_body.unwrap_or(msg.timestamp),
        sent_at_in_body: from_body.is_some(),
        fields,
    })
}

/// Parse a batch of messages, separating successes from failures.
///
/// Returns `(envelopes, errors)` where each error is keyed by message id.
pub fn parse_batch(messages: &[QueueMessage]) -> (Vec<Envelope>, Vec<(String, QueueError)>) {
    let mut envelopes = Vec::with_capacity(messages.len());
    let mut errors = Vec::new();

    for msg in messages {
        match parse_envelope(msg) {
            Ok(envelope) => envelopes.push(envelope),
            Err(e) => {
                warn!(message_id = %msg.id, error = %e, "Unparseable message body");
                errors.push((msg.id.clone(), e));
            }
        }
    }

    (envelopes, errors)
}
