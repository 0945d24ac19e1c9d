//! In-process queue with SQS delivery semantics.
//!
//! Messages fetched by [`MemoryQueue::poll_batch`] become invisible for the
//! visibility timeout and get a fresh receipt handle on every delivery. A
//! handle stops working once its timeout has run out, so a late delete fails
//! exactly the way it does against SQS. Time comes from the tokio clock:
//! tests can pause and advance it.
//!
//! Faults can be injected for the depth lookup, individual polls and deletes
//! of specific messages.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::client::{QueueClient, QueueMessage};
use crate::error::QueueError;

/// How [`MemoryQueue::approximate_depth`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthMode {
    /// Count of currently visible messages.
    Exact,
    /// A fixed estimate, regardless of contents.
    Fixed(u64),
    /// The backend answers without a count.
    Missing,
    /// The lookup itself fails.
    Failing,
}

/// Call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub depth_calls: usize,
    pub polls: usize,
    pub empty_polls: usize,
    pub acks: usize,
    pub failed_acks: usize,
}

#[derive(Debug)]
struct Stored {
    id: String,
    body: String,
    sent_at: DateTime<Utc>,
    receive_count: u32,
    receipt_handle: Option<String>,
    invisible_until: Option<Instant>,
}

impl Stored {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

#[derive(Debug)]
struct MemoryState {
    messages: Vec<Stored>,
    next_id: u64,
    depth_mode: DepthMode,
    fail_poll_at: Option<usize>,
    fail_ack_ids: HashSet<String>,
    stats: QueueStats,
}

/// In-memory [`QueueClient`].
#[derive(Debug)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    visibility_timeout: Duration,
    max_page: Option<usize>,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                messages: Vec::new(),
                next_id: 0,
                depth_mode: DepthMode::Exact,
                fail_poll_at: None,
                fail_ack_ids: HashSet::new(),
                stats: QueueStats::default(),
            }),
            visibility_timeout,
            max_page: None,
        }
    }

    /// Never return more than `max_page` messages per poll, whatever was asked.
    pub fn with_max_page(mut self, max_page: usize) -> Self {
        self.max_page = Some(max_page);
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue one message and return its id.
    pub fn send(&self, body: impl Into<String>) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("msg-{:06}", state.next_id);
        state.messages.push(Stored {
            id: id.clone(),
            body: body.into(),
            sent_at: Utc::now(),
            receive_count: 0,
            receipt_handle: None,
            invisible_until: None,
        });
        id
    }

    /// Enqueue `count` producer-style events (`{"sentAt": ...}`).
    pub fn send_events(&self, count: usize) -> Vec<String> {
        (0..count)
            .map(|_| {
                let body = serde_json::json!({ "sentAt": Utc::now().to_rfc3339() });
                self.send(body.to_string())
            })
            .collect()
    }

    pub fn set_depth_mode(&self, mode: DepthMode) {
        self.state().depth_mode = mode;
    }

    /// Make the `call`-th poll (1-based, counted from queue creation) fail.
    pub fn fail_poll_at(&self, call: usize) {
        self.state().fail_poll_at = Some(call);
    }

    /// Make every delete of `message_id` fail.
    pub fn fail_ack_for(&self, message_id: &str) {
        self.state().fail_ack_ids.insert(message_id.to_string());
    }

    pub fn clear_ack_failures(&self) {
        self.state().fail_ack_ids.clear();
    }

    /// Messages still stored, visible or not.
    pub fn len(&self) -> usize {
        self.state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages a poll could return right now.
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.state().messages.iter().filter(|m| m.is_visible(now)).count()
    }

    /// Whether `message_id` is still stored.
    pub fn contains(&self, message_id: &str) -> bool {
        self.state().messages.iter().any(|m| m.id == message_id)
    }

    pub fn stats(&self) -> QueueStats {
        self.state().stats.clone()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn approximate_depth(&self) -> Result<Option<u64>, QueueError> {
        let now = Instant::now();
        let mut state = self.state();
        state.stats.depth_calls += 1;
        match state.depth_mode {
            DepthMode::Exact => Ok(Some(
                state.messages.iter().filter(|m| m.is_visible(now)).count() as u64,
            )),
            DepthMode::Fixed(n) => Ok(Some(n)),
            DepthMode::Missing => Ok(None),
            DepthMode::Failing => Err(QueueError::Connection("depth lookup failed".into())),
        }
    }

    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Instant::now();
        let visibility_timeout = self.visibility_timeout;
        let mut limit = max_messages as usize;
        if let Some(max_page) = self.max_page {
            limit = limit.min(max_page);
        }

        let mut state = self.state();
        state.stats.polls += 1;
        if state.fail_poll_at == Some(state.stats.polls) {
            return Err(QueueError::Connection("receive failed".into()));
        }

        let page: Vec<QueueMessage> = state
            .messages
            .iter_mut()
            .filter(|m| m.is_visible(now))
            .take(limit)
            .map(|m| {
                let handle = Uuid::new_v4().to_string();
                m.receive_count += 1;
                m.receipt_handle = Some(handle.clone());
                m.invisible_until = Some(now + visibility_timeout);
                QueueMessage {
                    id: m.id.clone(),
                    body: m.body.clone(),
                    receipt_handle: handle,
                    timestamp: m.sent_at,
                    attempt_count: m.receive_count,
                }
            })
            .collect();

        if page.is_empty() {
            state.stats.empty_polls += 1;
        }
        debug!(requested = max_messages, returned = page.len(), "Memory queue poll");
        Ok(page)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut state = self.state();

        let position = state.messages.iter().position(|m| {
            m.receipt_handle.as_deref() == Some(receipt_handle)
                && m.invisible_until.is_some_and(|until| until > now)
        });
        let Some(position) = position else {
            state.stats.failed_acks += 1;
            return Err(QueueError::Ack(format!(
                "receipt handle {receipt_handle} is invalid or expired"
            )));
        };

        if state.fail_ack_ids.contains(&state.messages[position].id) {
            state.stats.failed_acks += 1;
            return Err(QueueError::Ack(format!(
                "delete of {} rejected",
                state.messages[position].id
            )));
        }

        state.messages.remove(position);
        state.stats.acks += 1;
        Ok(())
    }

    fn provider(&self) -> &str {
        "memory"
    }
}
