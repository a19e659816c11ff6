// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered delivery of records to one ingestion stream.
//!
//! ```text
//!    BufferHandle (clone per producer)
//!        │  append: serialize + channel send, never blocks
//!        v
//!    BufferService (single actor task)
//!        │  owns the open batch and the send queue
//!        v
//!    Transport ──► events API
//! ```
//!
//! The service seals the open batch when a size threshold is crossed, when
//! the flush interval elapses, or on an explicit flush or close, and drives
//! sealed batches through the transport strictly in seal order. A
//! rate-limited batch is held at the head of the queue until the governed
//! wait elapses; producers keep appending behind it the whole time. Batches
//! that exhaust the retry policy are handed back on the failure channel
//! together with their payload, so callers decide whether to re-enqueue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::batch::{Batch, SealedBatch};
use crate::config::SinkConfig;
use crate::error::{Error, FlushError, TransportError};
use crate::governor::RateLimitGovernor;
use crate::serializer;
use crate::transport::{EventsApi, Transport};

type Ack = oneshot::Sender<Result<(), Error>>;

#[derive(Debug)]
enum Command {
    Append(String),
    Flush(Ack),
    Close(Ack),
}

/// A batch the service gave up on, delivered on the failure channel so the
/// caller can decide whether to re-enqueue the payload.
#[derive(Debug)]
pub struct FailedFlush {
    pub records: usize,
    pub payload: Bytes,
    pub error: FlushError,
}

/// Outcome of one transport attempt, classified for the retry policy.
enum Attempt {
    Sent,
    RateLimited(Option<Duration>),
    Transient(TransportError),
    Permanent { status: StatusCode, body: String },
}

enum WaitEvent {
    Elapsed,
    Close(Option<Ack>),
}

enum DrainExit {
    Completed,
    CloseRequested(Option<Ack>),
}

/// Cloneable producer-side handle to a [`BufferService`].
#[derive(Clone, Debug)]
pub struct BufferHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl BufferHandle {
    /// Serializes the record and queues it for delivery.
    ///
    /// Serialization happens on the caller's task, so the only errors
    /// surfaced here are [`Error::Serialize`] and [`Error::Closed`].
    /// Transport problems surface later through `flush`, `close` or the
    /// failure channel.
    pub fn append<T: Serialize + ?Sized>(&self, record: &T) -> Result<(), Error> {
        let line = serializer::to_line(record)?;
        self.send(Command::Append(line))
    }

    /// Queues a pre-serialized JSON line.
    pub fn append_line(&self, line: String) -> Result<(), Error> {
        if line.contains('\n') {
            return Err(Error::Serialize(<serde_json::Error as serde::ser::Error>::custom(
                "raw line contains an embedded newline",
            )));
        }
        self.send(Command::Append(line))
    }

    /// Seals and transmits everything buffered so far, per the retry
    /// policy. A no-op when nothing is buffered.
    pub async fn flush(&self) -> Result<(), Error> {
        self.roundtrip(Command::Flush).await
    }

    /// Final flush, then service shutdown. Each remaining batch gets one
    /// best-effort send attempt; a pending backoff wait is cancelled rather
    /// than waited out. Failures surface as [`Error::Shutdown`].
    pub async fn close(&self) -> Result<(), Error> {
        self.roundtrip(Command::Close).await
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        self.tx.send(command).map_err(|_| Error::Closed)
    }

    async fn roundtrip(&self, make: impl FnOnce(Ack) -> Command) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| Error::Closed)?
    }
}

/// Service task that owns all buffer state.
///
/// Commands are processed strictly in order, so the open batch needs no
/// lock and no record can land in two batches. At most one send is in
/// flight per buffer at any time.
pub struct BufferService {
    rx: mpsc::UnboundedReceiver<Command>,
    transport: Arc<dyn Transport>,
    config: SinkConfig,
    governor: RateLimitGovernor,
    open: Batch,
    queue: VecDeque<SealedBatch>,
    flush_waiters: Vec<Ack>,
    failure_tx: mpsc::UnboundedSender<FailedFlush>,
}

impl BufferService {
    /// Builds the service, a producer handle and the failure channel.
    /// Spawn `service.run()` on the runtime and clone the handle per
    /// producer.
    pub fn new(
        config: SinkConfig,
        transport: Arc<dyn Transport>,
    ) -> (Self, BufferHandle, mpsc::UnboundedReceiver<FailedFlush>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let service = BufferService {
            rx,
            transport,
            config,
            governor: RateLimitGovernor::default(),
            open: Batch::new(),
            queue: VecDeque::new(),
            flush_waiters: Vec::new(),
            failure_tx,
        };
        (service, BufferHandle { tx }, failure_rx)
    }

    /// Runs until `close()` is called or every handle is dropped. Dropped
    /// handles still get buffered data a final flush attempt.
    pub async fn run(mut self) {
        debug!(stream = %self.config.stream, "buffer service started");
        let mut ticker = interval_at(
            Instant::now() + self.config.flush_interval,
            self.config.flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Append(line)) => {
                        if self.buffer_line(line) {
                            match self.drain(None).await {
                                DrainExit::Completed => ticker.reset(),
                                DrainExit::CloseRequested(ack) => {
                                    self.shutdown(ack).await;
                                    return;
                                }
                            }
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        self.seal_open();
                        match self.drain(Some(ack)).await {
                            DrainExit::Completed => ticker.reset(),
                            DrainExit::CloseRequested(ack) => {
                                self.shutdown(ack).await;
                                return;
                            }
                        }
                    }
                    Some(Command::Close(ack)) => {
                        self.shutdown(Some(ack)).await;
                        return;
                    }
                    None => {
                        self.shutdown(None).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if self.open.is_empty() && self.queue.is_empty() {
                        continue;
                    }
                    self.seal_open();
                    if let DrainExit::CloseRequested(ack) = self.drain(None).await {
                        self.shutdown(ack).await;
                        return;
                    }
                }
            }
        }
    }

    /// Adds a line to the open batch; seals it when a threshold is
    /// crossed. Returns true when a batch was sealed.
    fn buffer_line(&mut self, line: String) -> bool {
        self.open.push_line(&line);
        if self.open.records() >= self.config.max_batch_records
            || self.open.size_bytes() >= self.config.max_batch_bytes
        {
            self.seal_open();
            return true;
        }
        false
    }

    /// Moves the open batch onto the send queue. A no-op when empty.
    fn seal_open(&mut self) {
        if self.open.is_empty() {
            return;
        }
        let sealed = self.open.seal();
        debug!(
            records = sealed.records,
            bytes = sealed.payload.len(),
            stream = %self.config.stream,
            "sealed batch"
        );
        self.queue.push_back(sealed);
    }

    /// Sends every sealed batch in seal order, honoring the retry policy.
    ///
    /// Commands arriving while a backoff wait is pending are folded in:
    /// appends keep accumulating behind the held batch, flushes coalesce
    /// onto this drain, close cancels the wait and is returned to the
    /// caller. A batch that fails terminally stops the drain; the batches
    /// behind it stay queued in order for the next trigger.
    async fn drain(&mut self, waiter: Option<Ack>) -> DrainExit {
        self.flush_waiters.extend(waiter);
        let mut result: Result<(), FlushError> = Ok(());

        'queue: loop {
            // Bytes clone; the queue entry stays put until the outcome is known.
            let Some(head) = self.queue.front().cloned() else {
                break;
            };
            let mut attempts: u32 = 1;
            let mut limited: u32 = 0;
            loop {
                match self.attempt(&head).await {
                    Attempt::Sent => {
                        self.queue.pop_front();
                        continue 'queue;
                    }
                    Attempt::RateLimited(hint) => {
                        let wait = self.governor.resume_after(hint, limited);
                        limited += 1;
                        warn!(
                            wait_ms = wait.as_millis() as u64,
                            stream = %self.config.stream,
                            "rate limited, holding batch until the window resets"
                        );
                        if let WaitEvent::Close(ack) = self.wait_for(wait).await {
                            return DrainExit::CloseRequested(ack);
                        }
                    }
                    Attempt::Transient(source) => {
                        if attempts > self.config.max_retries {
                            let error = FlushError::Transient { attempts, source };
                            self.fail_head(error.clone());
                            result = Err(error);
                            break 'queue;
                        }
                        let wait = self.config.retry_delay(attempts);
                        warn!(
                            attempt = attempts,
                            wait_ms = wait.as_millis() as u64,
                            stream = %self.config.stream,
                            error = %source,
                            "send failed, retrying"
                        );
                        attempts += 1;
                        if let WaitEvent::Close(ack) = self.wait_for(wait).await {
                            return DrainExit::CloseRequested(ack);
                        }
                    }
                    Attempt::Permanent { status, body } => {
                        let error = FlushError::Permanent { status, body };
                        self.fail_head(error.clone());
                        result = Err(error);
                        break 'queue;
                    }
                }
            }
        }

        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(result.clone().map_err(Error::Flush));
        }
        DrainExit::Completed
    }

    /// One transport send, classified for the retry policy.
    async fn attempt(&self, batch: &SealedBatch) -> Attempt {
        debug!(
            records = batch.records,
            bytes = batch.payload.len(),
            stream = %self.config.stream,
            "sending batch"
        );
        match self.transport.send(batch.payload.clone()).await {
            Ok(response) if response.status.is_success() => Attempt::Sent,
            Ok(response) if response.status == StatusCode::TOO_MANY_REQUESTS => {
                Attempt::RateLimited(response.retry_after)
            }
            Ok(response) if response.status.is_client_error() => {
                if response.status == StatusCode::UNAUTHORIZED
                    || response.status == StatusCode::FORBIDDEN
                {
                    error!(
                        stream = %self.config.stream,
                        "request denied: check the token is valid and has append scope"
                    );
                }
                Attempt::Permanent {
                    status: response.status,
                    body: response.body,
                }
            }
            Ok(response) => Attempt::Transient(TransportError::Server {
                status: response.status,
                body: response.body,
            }),
            Err(err) => Attempt::Transient(err),
        }
    }

    /// Sleeps for `wait` while continuing to serve producers.
    async fn wait_for(&mut self, wait: Duration) -> WaitEvent {
        let deadline = sleep(wait);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return WaitEvent::Elapsed,
                command = self.rx.recv() => match command {
                    Some(Command::Append(line)) => {
                        self.buffer_line(line);
                    }
                    Some(Command::Flush(ack)) => self.flush_waiters.push(ack),
                    Some(Command::Close(ack)) => return WaitEvent::Close(Some(ack)),
                    None => return WaitEvent::Close(None),
                },
            }
        }
    }

    /// Pops the head batch and hands its payload back on the failure
    /// channel.
    fn fail_head(&mut self, error: FlushError) {
        if let Some(batch) = self.queue.pop_front() {
            error!(
                records = batch.records,
                stream = %self.config.stream,
                %error,
                "giving up on batch"
            );
            self.report_failure(batch, error);
        }
    }

    fn report_failure(&mut self, batch: SealedBatch, error: FlushError) {
        let failed = FailedFlush {
            records: batch.records,
            payload: batch.payload,
            error,
        };
        if self.failure_tx.send(failed).is_err() {
            // Failure receiver dropped; the log line is the last trace.
            warn!(
                stream = %self.config.stream,
                "failure channel closed, dropping failed batch payload"
            );
        }
    }

    /// Final flush and teardown. `ack` is the close caller, if any.
    async fn shutdown(&mut self, ack: Option<Ack>) {
        // Refuse new commands, then fold in whatever was already queued on
        // the channel so records appended before close are not dropped.
        self.rx.close();
        let mut stragglers: Vec<Ack> = Vec::new();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Append(line) => {
                    self.buffer_line(line);
                }
                Command::Flush(ack) | Command::Close(ack) => stragglers.push(ack),
            }
        }
        self.seal_open();

        let result = self.final_drain().await;
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.send(result.clone().map_err(Error::Flush));
        }
        for waiter in stragglers {
            let _ = waiter.send(result.clone().map_err(Error::Shutdown));
        }
        if let Some(ack) = ack {
            let _ = ack.send(result.clone().map_err(Error::Shutdown));
        }
        if let Err(error) = result {
            error!(stream = %self.config.stream, %error, "shutdown flush failed");
        }
        debug!(stream = %self.config.stream, "buffer service stopped");
    }

    /// One best-effort attempt per remaining batch. Backoff waits are
    /// skipped: close must not stall on a rate-limit window.
    async fn final_drain(&mut self) -> Result<(), FlushError> {
        let mut result = Ok(());
        while let Some(batch) = self.queue.pop_front() {
            let error = match self.attempt(&batch).await {
                Attempt::Sent => continue,
                Attempt::RateLimited(_) => FlushError::Transient {
                    attempts: 1,
                    source: TransportError::Server {
                        status: StatusCode::TOO_MANY_REQUESTS,
                        body: String::new(),
                    },
                },
                Attempt::Transient(source) => FlushError::Transient {
                    attempts: 1,
                    source,
                },
                Attempt::Permanent { status, body } => FlushError::Permanent { status, body },
            };
            self.report_failure(batch, error.clone());
            if result.is_ok() {
                result = Err(error);
            }
        }
        result
    }
}

/// Scoped form of the buffer: builds the transport and service from the
/// config, hands a handle to `f`, and closes on the way out so buffered
/// records get their final flush on every exit path. If the returned
/// future is dropped instead, the service still notices the handles going
/// away and performs the final flush itself.
pub async fn with_buffer<T, F, Fut>(config: SinkConfig, f: F) -> Result<T, Error>
where
    F: FnOnce(BufferHandle) -> Fut,
    Fut: Future<Output = T>,
{
    let transport = Arc::new(EventsApi::new(&config)?);
    let (service, handle, _failures) = BufferService::new(config, transport);
    let service_task = tokio::spawn(service.run());
    let value = f(handle.clone()).await;
    let closed = handle.close().await;
    let _ = service_task.await;
    closed?;
    Ok(value)
}
