// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch accumulation for newline-delimited JSON payloads.

use bytes::{BufMut, Bytes, BytesMut};

/// The open accumulation of serialized records.
///
/// Exactly one batch is open per buffer at any time. Sealing it hands the
/// payload to the send queue and leaves an empty batch behind, so an
/// in-flight payload can never gain or lose records.
#[derive(Debug, Default)]
pub struct Batch {
    buf: BytesMut,
    records: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one serialized record, newline-terminated.
    pub fn push_line(&mut self, line: &str) {
        self.buf.reserve(line.len() + 1);
        self.buf.put_slice(line.as_bytes());
        self.buf.put_u8(b'\n');
        self.records += 1;
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn size_bytes(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Closes the batch. The payload is frozen so retries can resend it
    /// without copying.
    pub fn seal(&mut self) -> SealedBatch {
        let records = std::mem::take(&mut self.records);
        SealedBatch {
            payload: self.buf.split().freeze(),
            records,
        }
    }
}

/// A closed batch queued for transmission. Content and record order are
/// fixed; retries resend the same payload.
#[derive(Debug, Clone)]
pub struct SealedBatch {
    pub payload: Bytes,
    pub records: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_keep_append_order() {
        let mut batch = Batch::new();
        batch.push_line(r#"{"n":1}"#);
        batch.push_line(r#"{"n":2}"#);
        batch.push_line(r#"{"n":3}"#);

        assert_eq!(batch.records(), 3);
        let sealed = batch.seal();
        assert_eq!(sealed.records, 3);
        assert_eq!(&sealed.payload[..], b"{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n");
    }

    #[test]
    fn test_seal_leaves_an_empty_batch() {
        let mut batch = Batch::new();
        batch.push_line(r#"{"n":1}"#);
        let _ = batch.seal();

        assert!(batch.is_empty());
        assert_eq!(batch.size_bytes(), 0);

        batch.push_line(r#"{"n":2}"#);
        let sealed = batch.seal();
        assert_eq!(&sealed.payload[..], b"{\"n\":2}\n");
    }

    #[test]
    fn test_size_tracks_payload_bytes() {
        let mut batch = Batch::new();
        assert_eq!(batch.size_bytes(), 0);
        batch.push_line("{}");
        assert_eq!(batch.size_bytes(), 3);
    }
}
