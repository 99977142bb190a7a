//! Retry scheduling for queued updates.
//!
//! # Policy
//!
//! - Nominal delay before retry N (N = attempts so far, N >= 1):
//!   `min(cap, base * 2^(N-1))`
//! - Jitter: +/- `jitter` fraction of the nominal delay, re-drawn on every check
//! - The jittered delay is clamped to `cap`
//! - An entry with zero attempts is always due

use std::time::Duration;

const DEFAULT_BASE_MS: u64 = 2_000;
const DEFAULT_CAP_MS: u64 = 60_000;
const DEFAULT_JITTER: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction in `[0.0, 1.0]`; `0.0` makes the schedule deterministic.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_BASE_MS),
            cap: Duration::from_millis(DEFAULT_CAP_MS),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter: if jitter.is_finite() {
                jitter.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    #[must_use]
    pub fn deterministic(base: Duration, cap: Duration) -> Self {
        Self::new(base, cap, 0.0)
    }

    /// Delay before the next attempt, without jitter.
    #[must_use]
    pub fn nominal_delay(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempts - 1).min(31);
        self.base
            .checked_mul(1_u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Lowest and highest delay [`Self::delay_for`] can return.
    #[must_use]
    pub fn bounds(&self, attempts: u32) -> (Duration, Duration) {
        let nominal = self.nominal_delay(attempts).as_secs_f64();
        let low = Duration::from_secs_f64(nominal * (1.0 - self.jitter));
        let high = Duration::from_secs_f64(nominal * (1.0 + self.jitter)).min(self.cap);
        (low, high)
    }

    /// Jittered delay before the next attempt.
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let nominal = self.nominal_delay(attempts);
        if self.jitter == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let spread = rand::random::<f64>().mul_add(2.0, -1.0) * self.jitter;
        Duration::from_secs_f64(nominal.as_secs_f64() * (1.0 + spread)).min(self.cap)
    }

    /// Whether an entry with this history may be retried at `now_ms`.
    #[must_use]
    pub fn is_due(&self, attempts: u32, last_attempt_at: Option<i64>, now_ms: i64) -> bool {
        let Some(last) = last_attempt_at else {
            return true;
        };
        if attempts == 0 {
            return true;
        }
        let elapsed = now_ms.saturating_sub(last);
        let delay = i64::try_from(self.delay_for(attempts).as_millis()).unwrap_or(i64::MAX);
        elapsed >= delay
    }
}
