//! The in-memory batch assembled by one drain.
//!
//! A [`Batch`] lives for exactly one invocation: it grows page by page while
//! draining, is handed to the processor once, and is dropped afterwards. It
//! also remembers when its first message was received, since that is when
//! the visibility-timeout clock started for the oldest member.

use std::ops::Deref;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::client::QueueMessage;

/// Why the drain loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainStop {
    /// A fetch returned zero messages.
    EmptyPage,
    /// The configured batch size cap was reached.
    MaxMessages,
    /// The configured drain duration ran out.
    MaxDuration,
}

/// Messages drained during one invocation, in arrival order.
#[derive(Debug)]
pub struct Batch {
    messages: Vec<QueueMessage>,
    pages: usize,
    first_received: Option<Instant>,
    stop: DrainStop,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            pages: 0,
            first_received: None,
            stop: DrainStop::EmptyPage,
        }
    }

    /// Append one fetched page.
    ///
    /// Starts the age timer on the first non-empty page.
    pub fn push(&mut self, page: Vec<QueueMessage>) {
        if page.is_empty() {
            return;
        }
        if self.first_received.is_none() {
            self.first_received = Some(Instant::now());
        }
        self.pages += 1;
        self.messages.extend(page);
    }

    pub(crate) fn set_stop(&mut self, stop: DrainStop) {
        self.stop = stop;
    }

    pub fn messages(&self) -> &[QueueMessage] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueueMessage> {
        self.messages.iter()
    }

    /// Number of messages in the batch.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of non-empty pages that went into the batch.
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn stop(&self) -> DrainStop {
        self.stop
    }

    /// Time since the first message was received, zero for an empty batch.
    pub fn age(&self) -> Duration {
        self.first_received
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }
}

/// A batch the processor has accepted. Only
/// [`process_batch`](crate::processor::process_batch) creates one, and
/// acknowledgment requires one.
#[derive(Debug)]
pub struct ProcessedBatch(Batch);

impl ProcessedBatch {
    pub(crate) fn new(batch: Batch) -> Self {
        Self(batch)
    }

    pub fn into_inner(self) -> Batch {
        self.0
    }
}

impl Deref for ProcessedBatch {
    type Target = Batch;

    fn deref(&self) -> &Batch {
        &self.0
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a QueueMessage;
    type IntoIter = std::slice::Iter<'a, QueueMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
