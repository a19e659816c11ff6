// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::error::Error;

/// Default record-count threshold that seals the open batch.
pub const DEFAULT_MAX_BATCH_RECORDS: usize = 10_000;

/// Default payload-size threshold that seals the open batch, in bytes.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

/// Default longest time a buffered record waits before a flush is attempted.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Default retry budget per batch for transient transport failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for one buffered ingestion destination.
///
/// Everything is explicit; nothing is read from the environment. A buffer is
/// bound to exactly one endpoint, token and stream for its whole lifetime.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Base URL of the events API, e.g. `https://api.example.com`.
    pub endpoint: String,
    /// Bearer token with append permission on the target stream.
    pub token: String,
    /// Name of the stream records are appended to.
    pub stream: String,
    /// Record count that seals the open batch and triggers a flush.
    pub max_batch_records: usize,
    /// Payload size that seals the open batch, in bytes.
    pub max_batch_bytes: usize,
    /// Longest time a record may sit in the open batch before a flush.
    pub flush_interval: Duration,
    /// Retry budget per batch for transient transport failures.
    pub max_retries: u32,
    /// Base backoff for transient retries, in milliseconds. Doubles with
    /// each attempt.
    pub retry_backoff_base_ms: u64,
    /// Timeout applied to each transport request.
    pub request_timeout: Duration,
}

impl SinkConfig {
    /// Builds a configuration with default thresholds. A trailing slash on
    /// the endpoint is dropped so URL construction stays uniform.
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        stream: impl Into<String>,
    ) -> Self {
        let endpoint: String = endpoint.into();
        SinkConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.into(),
            stream: stream.into(),
            max_batch_records: DEFAULT_MAX_BATCH_RECORDS,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_base_ms: 100,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.endpoint.is_empty() {
            return Err(Error::Config("endpoint must not be empty".to_string()));
        }
        if self.token.is_empty() {
            return Err(Error::Config("token must not be empty".to_string()));
        }
        if self.stream.is_empty() {
            return Err(Error::Config("stream name must not be empty".to_string()));
        }
        if self.max_batch_records == 0 {
            return Err(Error::Config(
                "max_batch_records must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Backoff before retry `attempt` (1-based) of a transient failure.
    /// Doubles per attempt, capped at 64x the base.
    pub(crate) fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms * (1 << attempt.saturating_sub(1).min(6)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SinkConfig::new("https://api.example.com", "token", "app_events");
        assert_eq!(config.max_batch_records, DEFAULT_MAX_BATCH_RECORDS);
        assert_eq!(config.max_batch_bytes, DEFAULT_MAX_BATCH_BYTES);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = SinkConfig::new("https://api.example.com/", "token", "app_events");
        assert_eq!(config.endpoint, "https://api.example.com");
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        assert!(SinkConfig::new("", "token", "app_events").validate().is_err());
        assert!(SinkConfig::new("https://api.example.com", "", "app_events")
            .validate()
            .is_err());
        assert!(SinkConfig::new("https://api.example.com", "token", "")
            .validate()
            .is_err());

        let mut config = SinkConfig::new("https://api.example.com", "token", "app_events");
        config.max_batch_records = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = SinkConfig::new("https://api.example.com", "token", "app_events");
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(200));
        assert_eq!(config.retry_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let config = SinkConfig::new("https://api.example.com", "token", "app_events");
        assert_eq!(config.retry_delay(50), Duration::from_millis(100 * 64));
    }
}
