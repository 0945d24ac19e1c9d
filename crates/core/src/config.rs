use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Load an explicit env file. Unlike [`load_dotenv`], a missing file is an error.
pub fn load_dotenv_from(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path)
        .map(|_| ())
        .map_err(|e| ConfigError::EnvFile(format!("{}: {}", path.display(), e)))
}

/// Largest page SQS hands out per `ReceiveMessage`.
pub const MAX_RECEIVE_PAGE_SIZE: u32 = 10;
/// SQS long-poll ceiling.
pub const MAX_RECEIVE_WAIT_SECS: u32 = 20;
/// SQS visibility timeout ceiling (12 hours).
pub const MAX_VISIBILITY_TIMEOUT_SECS: u32 = 43_200;

/// Env var naming the active profile.
pub const PROFILE_ENV: &str = "DRAINBATCH_PROFILE";

/// Profiled key lookup: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
struct Profiled<'a> {
    profile: &'a str,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Profiled<'_> {
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.lookup)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.lookup)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed_opt<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.opt(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::invalid(key, format!("cannot parse {raw:?}: {e}"))),
        }
    }

    fn parsed_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        Ok(self.parsed_opt(key)?.unwrap_or(default))
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub aws: AwsConfig,
    pub queue: QueueConfig,
    pub batch: BatchConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `DRAINBATCH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    ///
    /// Only unparseable values fail here; a missing queue URL is reported by
    /// [`Config::validate`] so the summary can still be logged.
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = env::var(PROFILE_ENV).unwrap_or_default();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(profile, &|key| env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(
        profile: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let p = profile.trim().to_uppercase();
        let source = Profiled { profile: &p, lookup };
        Ok(Self {
            aws: AwsConfig::from_source(&source),
            queue: QueueConfig::from_source(&source)?,
            batch: BatchConfig::from_source(&source)?,
            profile: p,
        })
    }

    /// Build config from a plain key/value map (no profile).
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup("", &|key| vars.get(key).cloned())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Check every value a consumer invocation relies on.
    ///
    /// The visibility timeout is the only exclusion mechanism between
    /// invocations, so a drain time cap must stay strictly below it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.queue_url()?;

        let q = &self.queue;
        if q.page_size == 0 || q.page_size > MAX_RECEIVE_PAGE_SIZE {
            return Err(ConfigError::invalid(
                "RECEIVE_PAGE_SIZE",
                format!("must be between 1 and {MAX_RECEIVE_PAGE_SIZE}, got {}", q.page_size),
            ));
        }
        if q.receive_wait_secs > MAX_RECEIVE_WAIT_SECS {
            return Err(ConfigError::invalid(
                "RECEIVE_WAIT_SECS",
                format!("must be at most {MAX_RECEIVE_WAIT_SECS}, got {}", q.receive_wait_secs),
            ));
        }
        if q.visibility_timeout_secs == 0 || q.visibility_timeout_secs > MAX_VISIBILITY_TIMEOUT_SECS {
            return Err(ConfigError::invalid(
                "VISIBILITY_TIMEOUT_SECS",
                format!(
                    "must be between 1 and {MAX_VISIBILITY_TIMEOUT_SECS}, got {}",
                    q.visibility_timeout_secs
                ),
            ));
        }

        let b = &self.batch;
        if b.max_batch_size == Some(0) {
            return Err(ConfigError::invalid("MAX_BATCH_SIZE", "must be at least 1"));
        }
        if let Some(max_drain) = b.max_drain_secs {
            if max_drain == 0 {
                return Err(ConfigError::invalid("MAX_DRAIN_SECS", "must be at least 1"));
            }
            if max_drain >= u64::from(q.visibility_timeout_secs) {
                return Err(ConfigError::invalid(
                    "MAX_DRAIN_SECS",
                    format!(
                        "must be below VISIBILITY_TIMEOUT_SECS ({}), got {max_drain}",
                        q.visibility_timeout_secs
                    ),
                ));
            }
        }
        if b.ack_concurrency == 0 {
            return Err(ConfigError::invalid("ACK_CONCURRENCY", "must be at least 1"));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  aws:    region={}, static_credentials={}, endpoint={}",
            self.aws.region,
            self.aws.has_static_credentials(),
            self.aws.endpoint_url.as_deref().unwrap_or("(default)")
        );
        tracing::info!(
            "  queue:  url={}, page_size={}, visibility_timeout={}s, wait={}s",
            self.queue.queue_url.as_deref().unwrap_or("(missing)"),
            self.queue.page_size,
            self.queue.visibility_timeout_secs,
            self.queue.receive_wait_secs
        );
        tracing::info!(
            "  batch:  minimum={}, max_size={}, max_drain={}, ack_concurrency={}",
            self.batch.minimum_batch_size,
            self.batch
                .max_batch_size
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
            self.batch
                .max_drain_secs
                .map_or_else(|| "unbounded".to_string(), |s| format!("{s}s")),
            self.batch.ack_concurrency
        );
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Endpoint override for SQS only (local emulators).
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_source(p: &Profiled<'_>) -> Self {
        Self {
            region: p.or("AWS_REGION", "us-east-1"),
            access_key_id: p.opt("AWS_ACCESS_KEY_ID"),
            secret_access_key: p.opt("AWS_SECRET_ACCESS_KEY"),
            session_token: p.opt("AWS_SESSION_TOKEN"),
            endpoint_url: p.opt("SQS_ENDPOINT_URL"),
        }
    }

    pub fn has_static_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

// ── Queue ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue_url: Option<String>,
    /// Messages requested per receive call.
    pub page_size: u32,
    /// Requested on every receive. Must exceed the worst-case time from the
    /// first fetch to the last delete of a batch.
    pub visibility_timeout_secs: u32,
    /// Long-poll wait per receive; 0 = short polling.
    pub receive_wait_secs: u32,
}

impl QueueConfig {
    fn from_source(p: &Profiled<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            queue_url: p.opt("EVENTS_SQS_URL").map(|s| s.trim().to_string()),
            page_size: p.parsed_or("RECEIVE_PAGE_SIZE", MAX_RECEIVE_PAGE_SIZE)?,
            visibility_timeout_secs: p.parsed_or("VISIBILITY_TIMEOUT_SECS", 300)?,
            receive_wait_secs: p.parsed_or("RECEIVE_WAIT_SECS", 0)?,
        })
    }

    pub fn queue_url(&self) -> Result<&str, ConfigError> {
        self.queue_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingQueueUrl)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.visibility_timeout_secs))
    }
}

// ── Batch ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Depth estimate below which an invocation exits without draining.
    pub minimum_batch_size: u64,
    /// Optional cap on messages drained per invocation (unset = unbounded).
    pub max_batch_size: Option<usize>,
    /// Optional cap on drain wall-clock time (unset = unbounded).
    pub max_drain_secs: Option<u64>,
    /// Concurrent deletes after processing; 1 = sequential.
    pub ack_concurrency: usize,
}

impl BatchConfig {
    fn from_source(p: &Profiled<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            minimum_batch_size: p.parsed_or("MINIMUM_BATCH_SIZE", 300)?,
            max_batch_size: p.parsed_opt("MAX_BATCH_SIZE")?,
            max_drain_secs: p.parsed_opt("MAX_DRAIN_SECS")?,
            ack_concurrency: p.parsed_or("ACK_CONCURRENCY", 1)?,
        })
    }

    pub fn max_drain_duration(&self) -> Option<Duration> {
        self.max_drain_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_map(&vars(&[("EVENTS_SQS_URL", "https://sqs/q")])).unwrap();
        assert_eq!(config.batch.minimum_batch_size, 300);
        assert_eq!(config.queue.page_size, 10);
        assert_eq!(config.queue.visibility_timeout_secs, 300);
        assert_eq!(config.queue.receive_wait_secs, 0);
        assert_eq!(config.batch.ack_concurrency, 1);
        assert!(config.batch.max_batch_size.is_none());
        assert!(config.batch.max_drain_secs.is_none());
        assert_eq!(config.aws.region, "us-east-1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_queue_url_is_reported_by_validate() {
        let config = Config::from_map(&vars(&[])).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingQueueUrl)));

        let config = Config::from_map(&vars(&[("EVENTS_SQS_URL", "")])).unwrap();
        assert!(matches!(config.queue.queue_url(), Err(ConfigError::MissingQueueUrl)));
    }

    #[test]
    fn test_unparseable_number_fails() {
        let err = Config::from_map(&vars(&[("MINIMUM_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("MINIMUM_BATCH_SIZE"));
    }

    #[test]
    fn test_profile_prefix_wins() {
        let env = vars(&[
            ("EVENTS_SQS_URL", "https://sqs/default"),
            ("PROD_EVENTS_SQS_URL", "https://sqs/prod"),
            ("MINIMUM_BATCH_SIZE", "50"),
        ]);
        let config = Config::from_lookup("prod", &|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.profile_label(), "PROD");
        assert_eq!(config.queue.queue_url().unwrap(), "https://sqs/prod");
        // Unprefixed keys still apply when the profile has no override.
        assert_eq!(config.batch.minimum_batch_size, 50);
    }

    #[test]
    fn test_page_size_out_of_range() {
        let config = Config::from_map(&vars(&[
            ("EVENTS_SQS_URL", "https://sqs/q"),
            ("RECEIVE_PAGE_SIZE", "11"),
        ]))
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("RECEIVE_PAGE_SIZE"));
    }

    #[test]
    fn test_drain_cap_must_stay_below_visibility_timeout() {
        let config = Config::from_map(&vars(&[
            ("EVENTS_SQS_URL", "https://sqs/q"),
            ("VISIBILITY_TIMEOUT_SECS", "60"),
            ("MAX_DRAIN_SECS", "60"),
        ]))
        .unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_map(&vars(&[
            ("EVENTS_SQS_URL", "https://sqs/q"),
            ("VISIBILITY_TIMEOUT_SECS", "60"),
            ("MAX_DRAIN_SECS", "45"),
        ]))
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.max_drain_duration(), Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_zero_limits_rejected() {
        for (key, value) in [("MAX_BATCH_SIZE", "0"), ("ACK_CONCURRENCY", "0")] {
            let config = Config::from_map(&vars(&[("EVENTS_SQS_URL", "https://sqs/q"), (key, value)]))
                .unwrap();
            assert!(config.validate().is_err(), "{key}={value} should be rejected");
        }
    }
}
