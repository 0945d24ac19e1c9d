//! The scheduled batch consumer.
//!
//! One call of [`BatchConsumer::run_once`] is one invocation: read the depth
//! estimate, drain if the gate opens, hand the batch to the processor, then
//! delete each message. Nothing is kept between invocations.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use drainbatch_core::config::{Config, MAX_RECEIVE_PAGE_SIZE};
use drainbatch_core::ConfigError;

use crate::ack::{acknowledge, AckFailure};
use crate::batch::DrainStop;
use crate::client::QueueClient;
use crate::drain::{drain, DrainLimits};
use crate::error::BatchError;
use crate::gate::{BatchGate, GateDecision};
use crate::processor::{process_batch, BatchProcessor};

/// Per-invocation tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub minimum_batch_size: u64,
    pub limits: DrainLimits,
    /// Visibility timeout the queue applies to fetched messages.
    ///
    /// Must exceed the worst-case time from the first fetch to the last
    /// delete, or another invocation may see the same messages.
    pub visibility_timeout: Duration,
    pub ack_concurrency: usize,
}

impl ConsumerSettings {
    /// Defaults: 10 per page, unbounded drain, 300s visibility, sequential deletes.
    pub fn new(minimum_batch_size: u64) -> Self {
        Self {
            minimum_batch_size,
            limits: DrainLimits::unbounded(MAX_RECEIVE_PAGE_SIZE),
            visibility_timeout: Duration::from_secs(300),
            ack_concurrency: 1,
        }
    }

    /// Validate `config` and take the consumer settings from it.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            minimum_batch_size: config.batch.minimum_batch_size,
            limits: DrainLimits {
                page_size: config.queue.page_size,
                max_messages: config.batch.max_batch_size,
                max_duration: config.batch.max_drain_duration(),
            },
            visibility_timeout: config.queue.visibility_timeout(),
            ack_concurrency: config.batch.ack_concurrency,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.limits.page_size = page_size;
        self
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.limits.max_messages = Some(max);
        self
    }

    pub fn with_max_drain_duration(mut self, max: Duration) -> Self {
        self.limits.max_duration = Some(max);
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_ack_concurrency(mut self, concurrency: usize) -> Self {
        self.ack_concurrency = concurrency;
        self
    }
}

/// What one invocation did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvocationReport {
    /// Depth estimate below the minimum; nothing was drained.
    Skipped { depth: u64, minimum_batch_size: u64 },
    /// The gate opened but the drain came back empty, e.g. another consumer
    /// got there first.
    Empty { depth: u64 },
    /// A batch was processed and acknowledged, possibly with some deletes failing.
    Processed {
        depth: u64,
        batch_size: usize,
        pages: usize,
        stop: DrainStop,
        acked: usize,
        ack_failures: Vec<AckFailure>,
        elapsed_ms: u64,
    },
}

impl InvocationReport {
    pub fn batch_size(&self) -> usize {
        match self {
            InvocationReport::Processed { batch_size, .. } => *batch_size,
            _ => 0,
        }
    }

    pub fn ack_failures(&self) -> &[AckFailure] {
        match self {
            InvocationReport::Processed { ack_failures, .. } => ack_failures,
            _ => &[],
        }
    }
}

/// Gate, drain, process and acknowledge, once per call.
pub struct BatchConsumer<Q, P> {
    client: Q,
    processor: P,
    settings: ConsumerSettings,
}

impl<Q, P> BatchConsumer<Q, P>
where
    Q: QueueClient,
    P: BatchProcessor,
{
    pub fn new(client: Q, processor: P, settings: ConsumerSettings) -> Self {
        Self {
            client,
            processor,
            settings,
        }
    }

    pub fn client(&self) -> &Q {
        &self.client
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Run one invocation.
    ///
    /// Fatal errors end the invocation right away with nothing retried; any
    /// message fetched but not deleted reappears after its visibility
    /// timeout. Failed deletes are not fatal and come back in the report.
    pub async fn run_once(&self) -> Result<InvocationReport, BatchError> {
        let started = Instant::now();
        let provider = self.client.provider();

        let depth = match self.client.approximate_depth().await {
            Ok(Some(depth)) => depth,
            Ok(None) => {
                return Err(BatchError::DepthUnavailable(
                    "ApproximateNumberOfMessages attribute missing".into(),
                ))
            }
            Err(e) => return Err(BatchError::DepthUnavailable(e.to_string())),
        };

        let gate = BatchGate::new(self.settings.minimum_batch_size);
        if gate.check(depth) == GateDecision::Skip {
            info!(
                provider,
                depth,
                minimum_batch_size = gate.minimum_batch_size(),
                "Number of messages ({}) is not enough to process as a batch. Exiting",
                depth
            );
            return Ok(InvocationReport::Skipped {
                depth,
                minimum_batch_size: gate.minimum_batch_size(),
            });
        }

        debug!(provider, depth, limits = ?self.settings.limits, "Draining queue");
        let batch = drain(&self.client, self.settings.limits).await?;

        if batch.is_empty() {
            info!(provider, depth, "Queue drained empty, nothing to process");
            return Ok(InvocationReport::Empty { depth });
        }

        info!(
            provider,
            depth,
            batch_size = batch.len(),
            pages = batch.pages(),
            stop = ?batch.stop(),
            processor = self.processor.name(),
            "Batch drained"
        );

        let processed = process_batch(&self.processor, batch).await?;
        let acks = acknowledge(&self.client, &processed, self.settings.ack_concurrency).await;

        let age = processed.age();
        if age >= self.settings.visibility_timeout {
            warn!(
                batch_age_ms = age.as_millis() as u64,
                visibility_timeout_secs = self.settings.visibility_timeout.as_secs(),
                "Batch outlived the visibility timeout; its messages may already be redelivered"
            );
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            provider,
            batch_size = processed.len(),
            acked = acks.acked,
            ack_failures = acks.failures.len(),
            elapsed_ms,
            "Batch processed"
        );

        Ok(InvocationReport::Processed {
            depth,
            batch_size: processed.len(),
            pages: processed.pages(),
            stop: processed.stop(),
            acked: acks.acked,
            ack_failures: acks.failures,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_settings_from_config() {
        let vars: HashMap<String, String> = [
            ("EVENTS_SQS_URL", "https://sqs.us-east-1.amazonaws.com/1/events"),
            ("MINIMUM_BATCH_SIZE", "120"),
            ("RECEIVE_PAGE_SIZE", "5"),
            ("MAX_BATCH_SIZE", "1000"),
            ("MAX_DRAIN_SECS", "30"),
            ("VISIBILITY_TIMEOUT_SECS", "90"),
            ("ACK_CONCURRENCY", "4"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = Config::from_map(&vars).unwrap();

        let settings = ConsumerSettings::from_config(&config).unwrap();
        assert_eq!(settings.minimum_batch_size, 120);
        assert_eq!(settings.limits.page_size, 5);
        assert_eq!(settings.limits.max_messages, Some(1000));
        assert_eq!(settings.limits.max_duration, Some(Duration::from_secs(30)));
        assert_eq!(settings.visibility_timeout, Duration::from_secs(90));
        assert_eq!(settings.ack_concurrency, 4);
    }

    #[test]
    fn test_settings_require_queue_url() {
        let config = Config::from_map(&HashMap::new()).unwrap();
        assert!(matches!(
            ConsumerSettings::from_config(&config),
            Err(ConfigError::MissingQueueUrl)
        ));
    }

    #[test]
    fn test_report_serializes_with_outcome_tag() {
        let report = InvocationReport::Skipped {
            depth: 299,
            minimum_batch_size: 300,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["depth"], 299);
        assert_eq!(report.batch_size(), 0);
        assert!(report.ack_failures().is_empty());
    }
}
