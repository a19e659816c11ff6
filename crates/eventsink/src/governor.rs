// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backoff computation for rate-limited sends.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Duration;

/// Default first wait when the server gives no resume hint.
pub const DEFAULT_BASE_WAIT: Duration = Duration::from_secs(1);

/// Ceiling on computed waits.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Computes how long to hold a batch after a rate-limit response.
///
/// A server-provided resume hint is honored verbatim. Without one, the wait
/// grows exponentially with the number of consecutive rate-limit responses,
/// drawn uniformly from the upper half of the window so simultaneous
/// clients do not resend in lockstep, and capped at the ceiling.
#[derive(Debug)]
pub struct RateLimitGovernor {
    base: Duration,
    cap: Duration,
    rng: StdRng,
}

impl Default for RateLimitGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_WAIT, DEFAULT_MAX_WAIT)
    }
}

impl RateLimitGovernor {
    pub fn new(base: Duration, cap: Duration) -> Self {
        RateLimitGovernor {
            base,
            cap,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixed-seed constructor so tests get reproducible jitter.
    pub fn with_seed(base: Duration, cap: Duration, seed: u64) -> Self {
        RateLimitGovernor {
            base,
            cap,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Wait before the next send attempt. `consecutive` counts the
    /// rate-limit responses already observed for the batch in flight.
    pub fn resume_after(&mut self, hint: Option<Duration>, consecutive: u32) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let window = self
            .base
            .saturating_mul(1u32 << consecutive.min(6))
            .min(self.cap);
        let half = window / 2;
        let jitter = self.rng.gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(jitter)
    }
}
