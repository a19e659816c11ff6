// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record serialization to newline-delimited JSON.

use serde::Serialize;

use crate::error::Error;

/// Serializes a record as a single JSON line.
///
/// The JSON encoder escapes string content, so the returned line never
/// carries an unescaped newline. The terminating newline is appended by the
/// batch, not here.
pub fn to_line<T: Serialize + ?Sized>(record: &T) -> Result<String, Error> {
    Ok(serde_json::to_string(record)?)
}
