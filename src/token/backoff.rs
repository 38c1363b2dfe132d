//! Exponential backoff with jitter for claim and refresh retries.

use crate::config::AuthConfig;
use rand_core::{OsRng, RngCore};
use std::time::Duration;

/// Exponential backoff state.
///
/// Delay for attempt `n` (0-based) is `base * 2^n`, capped, then spread by
/// the relative jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f32,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, jitter: f32) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter: jitter.clamp(0.0, 0.99),
            attempts: 0,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_cap, config.backoff_jitter)
    }

    /// Delay before attempt `attempt` without jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay to wait now; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal_delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        spread(nominal, self.jitter, OsRng.next_u32())
    }

    /// Start over after a success.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Scale `delay` by a factor in `[1 - jitter, 1 + jitter]` chosen by `random`.
fn spread(delay: Duration, jitter: f32, random: u32) -> Duration {
    let unit = random as f64 / u32::MAX as f64;
    let factor = 1.0 + f64::from(jitter) * (2.0 * unit - 1.0);
    delay.mul_f64(factor.max(0.0))
}
