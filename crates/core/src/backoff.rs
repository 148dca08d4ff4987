// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backoff schedule for failed beads.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default abandonment threshold. `0` disables abandonment.
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// `initial * multiplier^(k-2)` capped at `max`, computed iteratively so a
/// large attempt count can never overflow or round incorrectly via `powf`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(60),
            multiplier: 2.0,
            max: Duration::from_secs(3600),
        }
    }
}

impl BackoffSchedule {
    /// Delay before a bead at attempt count `attempts` becomes eligible again.
    ///
    /// `attempts <= 1` -> 0; `attempts == 2` -> `initial`; `attempts == k` ->
    /// `min(initial * multiplier^(k-2), max)`, built by repeated multiplication
    /// rather than `powf` so the cap is honored exactly even for huge `k`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts <= 1 {
            return Duration::ZERO;
        }
        let mut delay = self.initial;
        for _ in 0..(attempts - 2) {
            if delay >= self.max {
                return self.max;
            }
            let scaled = delay.as_secs_f64() * self.multiplier;
            delay = Duration::from_secs_f64(scaled);
        }
        delay.min(self.max)
    }
}
