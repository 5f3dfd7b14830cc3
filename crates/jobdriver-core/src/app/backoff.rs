//! Backoff policy for transient store errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff with full jitter on top of the computed delay.
///
/// delay(n) = min(base * multiplier^(n-1), max), then a random value in
/// `[delay/2, delay]` so slots retrying together spread out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub base_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: 200,
            multiplier: 2.0,
            max_ms: 10_000,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-indexed), without jitter.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay_ms = (self.base_ms as f64) * self.multiplier.max(1.0).powi(exponent);
        let capped = delay_ms.min(self.max_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Jittered delay for retry number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let half = ceiling / 2;
        let spread = ceiling.saturating_sub(half).as_millis() as u64;
        if spread == 0 {
            return ceiling;
        }
        half + Duration::from_millis(rand::random::<u64>() % (spread + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 200)]
    #[case(1, 200)]
    #[case(2, 400)]
    #[case(3, 800)]
    #[case(10, 10_000)]
    #[case(u32::MAX, 10_000)]
    fn ceiling_grows_then_caps(#[case] attempt: u32, #[case] want_ms: u64) {
        assert_eq!(Backoff::default().ceiling(attempt), Duration::from_millis(want_ms));
    }

    #[test]
    fn jittered_delay_stays_within_half_and_ceiling() {
        let backoff = Backoff::default();
        for attempt in 1..8 {
            let ceiling = backoff.ceiling(attempt);
            for _ in 0..50 {
                let d = backoff.delay(attempt);
                assert!(d >= ceiling / 2 && d <= ceiling, "{d:?} vs {ceiling:?}");
            }
        }
    }

    #[test]
    fn zero_base_means_no_wait() {
        let backoff = Backoff {
            base_ms: 0,
            ..Default::default()
        };
        assert_eq!(backoff.delay(3), Duration::ZERO);
    }
}
