// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Token-Bucket Rate Limiter
//!
//! Per-backend request throttling. Each registered search provider gets a
//! bucket sized from its advertised requests-per-minute quota; acquiring a
//! token is a suspension point, so saturated providers exert backpressure on
//! the stages calling them instead of burning quota.
//!
//! Timekeeping uses `tokio::time::Instant`, so paused-clock tests can drive
//! refill deterministically.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at a fixed rate.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a bucket holding `capacity` tokens, refilled at
    /// `refill_per_sec`.
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1.0);
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Creates a bucket for a requests-per-minute quota, with burst capacity
    /// equal to one minute of quota.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1) as f64;
        Self::new(rpm, rpm / 60.0)
    }

    /// Takes a token without waiting. Returns false when the bucket is
    /// empty.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits until a token is available, then takes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (after refill).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}
