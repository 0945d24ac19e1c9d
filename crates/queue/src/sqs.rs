//! AWS SQS queue client.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::retry::RetryConfig;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use chrono::{TimeZone, Utc};
use tracing::{debug, info};

use drainbatch_core::config::{AwsConfig, QueueConfig, MAX_RECEIVE_PAGE_SIZE};

use crate::client::{QueueClient, QueueMessage};
use crate::error::QueueError;

/// SQS-backed queue client.
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    visibility_timeout_secs: i32,
    wait_time_secs: i32,
}

impl SqsQueue {
    /// Create a new SQS client from project config.
    ///
    /// SDK retries are disabled: a failed call surfaces immediately and the
    /// next scheduled invocation is the retry.
    pub fn new(aws: &AwsConfig, queue: &QueueConfig) -> Result<Self, QueueError> {
        let queue_url = queue
            .queue_url()
            .map_err(|e| QueueError::NotFound(e.to_string()))?
            .to_string();

        let region = aws_sdk_sqs::config::Region::new(aws.region.clone());

        // Build the SQS config directly rather than through aws_config::defaults(),
        // which would pick up a generic AWS_ENDPOINT_URL meant for another service.
        let mut sqs_config = aws_sdk_sqs::Config::builder()
            .region(region)
            .behavior_version(BehaviorVersion::latest())
            .retry_config(RetryConfig::disabled());

        // Use static credentials if provided (local dev / explicit config).
        if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
            let creds = Credentials::new(
                key_id,
                secret,
                aws.session_token.clone(),
                None,
                "drainbatch-static",
            );
            sqs_config = sqs_config.credentials_provider(creds);
        }

        if let Some(ref endpoint) = aws.endpoint_url {
            if !endpoint.is_empty() {
                let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                    endpoint.clone()
                } else {
                    format!("https://{endpoint}")
                };
                sqs_config = sqs_config.endpoint_url(&url);
            }
        }

        let client = Client::from_conf(sqs_config.build());

        info!(
            queue_url = %queue_url,
            region = %aws.region,
            visibility_timeout_secs = queue.visibility_timeout_secs,
            "SQS client initialized"
        );

        Ok(Self::with_client(client, queue_url, queue))
    }

    /// Wrap an already built SDK client.
    pub fn with_client(client: Client, queue_url: String, queue: &QueueConfig) -> Self {
        Self {
            client,
            queue_url,
            visibility_timeout_secs: queue.visibility_timeout_secs as i32,
            wait_time_secs: queue.receive_wait_secs as i32,
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl QueueClient for SqsQueue {
    async fn approximate_depth(&self) -> Result<Option<u64>, QueueError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| {
                QueueError::Connection(format!(
                    "SQS get attributes failed: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        let count = resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse::<u64>().ok());

        Ok(count)
    }

    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let capped = max_messages.clamp(1, MAX_RECEIVE_PAGE_SIZE) as i32;

        debug!(max_messages = capped, "Polling SQS");

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(self.wait_time_secs)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| {
                QueueError::Connection(format!("SQS receive failed: {}", DisplayErrorContext(&e)))
            })?;

        let sqs_messages = resp.messages.unwrap_or_default();
        debug!(count = sqs_messages.len(), "Received SQS messages");

        let mut messages = Vec::with_capacity(sqs_messages.len());
        for msg in sqs_messages {
            let id = msg.message_id().unwrap_or("unknown").to_string();
            let body = msg.body().unwrap_or("").to_string();

            let receipt_handle = msg
                .receipt_handle()
                .ok_or_else(|| QueueError::Parse(format!("message {id} missing receipt handle")))?
                .to_string();

            // SentTimestamp is epoch millis.
            let timestamp = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            let attempt_count = msg
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1);

            messages.push(QueueMessage {
                id,
                body,
                receipt_handle,
                timestamp,
                attempt_count,
            });
        }

        Ok(messages)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "Deleting SQS message");

        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| {
                QueueError::Ack(format!("SQS delete failed: {}", DisplayErrorContext(&e)))
            })?;

        Ok(())
    }

    fn provider(&self) -> &str {
        "sqs"
    }
}
