// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side ingestion buffering for an NDJSON events API.
//!
//! Records are appended through a cloneable [`BufferHandle`], accumulated
//! in memory by a single service task, and flushed as newline-delimited
//! JSON batches against the remote endpoint. The service honors the API's
//! rate limits (waiting out `429` responses, with or without a server
//! hint) and retries transient transport failures with bounded exponential
//! backoff. Batches it gives up on are handed back, payload included, on a
//! failure channel.
//!
//! Nothing is persisted: a process restart loses whatever has not been
//! flushed yet.
//!
//! ```rust,ignore
//! use eventsink::{with_buffer, SinkConfig};
//!
//! let config = SinkConfig::new("https://api.example.com", token, "app_events");
//! with_buffer(config, |events| async move {
//!     events.append(&serde_json::json!({"level": "info", "message": "hello"}))?;
//!     Ok::<_, eventsink::Error>(())
//! })
//! .await??;
//! ```

pub mod batch;
pub mod buffer;
pub mod config;
pub mod error;
pub mod governor;
pub mod serializer;
pub mod transport;

pub use buffer::{with_buffer, BufferHandle, BufferService, FailedFlush};
pub use config::SinkConfig;
pub use error::{Error, FlushError, TransportError};
pub use governor::RateLimitGovernor;
pub use transport::{EventsApi, SendResponse, Transport};
