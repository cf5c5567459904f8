//! Reconnect backoff policy
//!
//! Delay after the n-th consecutive failed connection (zero-indexed) is
//! `min(500 * 2^n, 16000)` milliseconds, perturbed by uniform jitter of
//! +/-20% of the base delay and clamped to non-negative. The attempt counter
//! resets on a successful `connected` acknowledgement.

use rand::Rng;
use std::time::Duration;

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 16_000;
const JITTER_RATIO: f64 = 0.2;

/// Exponential backoff with jitter for reconnect scheduling.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempts: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempts: 0 }
    }

    /// Consecutive failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Base delay for the current attempt, before jitter.
    pub fn base_delay(&self) -> Duration {
        let exp = self.attempts.min(16);
        let ms = BASE_DELAY_MS.saturating_mul(1u64 << exp).min(MAX_DELAY_MS);
        Duration::from_millis(ms)
    }

    /// Jittered delay for the current attempt; advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay().as_millis() as f64;
        self.attempts = self.attempts.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
        let delayed = (base * (1.0 + jitter)).max(0.0);
        Duration::from_millis(delayed as u64)
    }

    /// Reset on a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
