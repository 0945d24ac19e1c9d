use thiserror::Error;

/// Problems with the ambient configuration. Always fatal: an invocation
/// aborts before touching the queue.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("queue URL missing: set EVENTS_SQS_URL")]
    MissingQueueUrl,

    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("env file error: {0}")]
    EnvFile(String),
}

impl ConfigError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
