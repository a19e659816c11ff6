// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP boundary to the events ingestion API.
//!
//! The buffer core talks to the remote endpoint through the [`Transport`]
//! trait, one POST per batch. [`EventsApi`] is the reqwest-backed
//! implementation; tests substitute scripted transports.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use crate::config::SinkConfig;
use crate::error::{Error, TransportError};

/// Secondary resume hint, in seconds until the rate-limit window resets.
const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// What the buffer core needs to know about one send attempt.
#[derive(Debug, Clone)]
pub struct SendResponse {
    pub status: StatusCode,
    /// Server-provided resume hint on rate-limited responses.
    pub retry_after: Option<Duration>,
    /// Response body, read only for non-2xx statuses.
    pub body: String,
}

/// One-operation boundary to the remote API.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, payload: Bytes) -> Result<SendResponse, TransportError>;
}

/// Transport backed by the events HTTP API.
#[derive(Debug, Clone)]
pub struct EventsApi {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    timeout: Duration,
}

impl EventsApi {
    pub fn new(config: &SinkConfig) -> Result<Self, Error> {
        config.validate()?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| Error::Config("token contains characters not valid in a header".to_string()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        Ok(EventsApi {
            client,
            url: events_url(&config.endpoint, &config.stream),
            headers,
            timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl Transport for EventsApi {
    async fn send(&self, payload: Bytes) -> Result<SendResponse, TransportError> {
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        let retry_after = retry_after_from_headers(response.headers());
        // Skip reading the body on success, nobody looks at it.
        let body = if status.is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };
        debug!(
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "events api responded"
        );
        Ok(SendResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Appends are always NDJSON against the events endpoint; the stream name
/// rides in the query string.
fn events_url(endpoint: &str, stream: &str) -> String {
    format!("{endpoint}/v0/events?mode=append&name={stream}&format=ndjson&wait=false")
}

fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let seconds = |name: &str| -> Option<u64> { headers.get(name)?.to_str().ok()?.parse().ok() };
    seconds(RETRY_AFTER.as_str())
        .or_else(|| seconds(RATE_LIMIT_RESET_HEADER))
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SinkConfig {
        SinkConfig::new("https://api.example.com", "test-token", "app_events")
    }

    #[test]
    fn test_events_url() {
        assert_eq!(
            events_url("https://api.example.com", "app_events"),
            "https://api.example.com/v0/events?mode=append&name=app_events&format=ndjson&wait=false"
        );
    }

    #[test]
    fn test_new_sets_auth_and_content_type() {
        let api = EventsApi::new(&test_config()).unwrap();
        assert_eq!(
            api.headers.get(CONTENT_TYPE).unwrap(),
            "application/x-ndjson"
        );
        assert!(api.headers.contains_key(AUTHORIZATION));
        assert!(api.url.contains("name=app_events"));
    }

    #[test]
    fn test_new_rejects_token_with_control_characters() {
        let mut config = test_config();
        config.token = "bad\ntoken".to_string();
        assert!(matches!(EventsApi::new(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = test_config();
        config.stream = String::new();
        assert!(EventsApi::new(&config).is_err());
    }

    #[test]
    fn test_retry_after_header_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        headers.insert(RATE_LIMIT_RESET_HEADER, HeaderValue::from_static("60"));
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_secs(12))
        );
    }

    #[test]
    fn test_rate_limit_reset_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(RATE_LIMIT_RESET_HEADER, HeaderValue::from_static("60"));
        assert_eq!(
            retry_after_from_headers(&headers),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_unparsable_hint_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after_from_headers(&headers), None);
    }
}
