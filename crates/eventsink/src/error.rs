// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors surfaced to callers of the buffer API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The record could not be serialized as a JSON line. Never retried.
    #[error("record is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A flush attempt failed after exhausting the retry policy.
    #[error(transparent)]
    Flush(#[from] FlushError),

    /// The final flush performed by `close()` failed. The affected batch
    /// payloads were delivered on the failure channel.
    #[error("final flush on close failed: {0}")]
    Shutdown(#[source] FlushError),

    /// The buffer service has shut down and the handle is no longer usable.
    #[error("buffer already closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Terminal outcome of transmitting one batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlushError {
    /// Network errors, timeouts and 5xx responses, retried with backoff
    /// until the retry budget is exhausted.
    #[error("transport failed after {attempts} attempts: {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// A non-rate-limit 4xx response. Not retried.
    #[error("ingestion endpoint rejected the batch ({status}): {body}")]
    Permanent { status: StatusCode, body: String },
}

/// Transport-level failure causes. Rate limiting is not represented here:
/// 429 responses are waited out and resent, they never fail a batch on
/// their own.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("failed to reach ingestion endpoint: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("server error {status}: {body}")]
    Server { status: StatusCode, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_display() {
        let error = FlushError::Transient {
            attempts: 4,
            source: TransportError::Connection("connection reset".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "transport failed after 4 attempts: failed to reach ingestion endpoint: connection reset"
        );
    }

    #[test]
    fn test_permanent_display() {
        let error = FlushError::Permanent {
            status: StatusCode::BAD_REQUEST,
            body: "unknown stream".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "ingestion endpoint rejected the batch (400 Bad Request): unknown stream"
        );
    }

    #[test]
    fn test_shutdown_wraps_flush_error() {
        let error = Error::Shutdown(FlushError::Transient {
            attempts: 1,
            source: TransportError::Timeout,
        });
        assert!(error.to_string().starts_with("final flush on close failed"));
    }

    #[test]
    fn test_flush_error_is_transparent() {
        let inner = FlushError::Permanent {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        let error = Error::from(inner.clone());
        assert_eq!(error.to_string(), inner.to_string());
    }
}
