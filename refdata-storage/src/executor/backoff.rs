//! Jittered exponential backoff between retries.

use rand::Rng;
use std::time::Duration;

/// Ceiling (before jitter) for retry number `retry` (1-based).
///
/// `base * 2^(retry-1)`, clamped to `max`.
pub fn backoff_ceiling(retry: u32, base: Duration, max: Duration) -> Duration {
    let shift = retry.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << shift).min(max)
}

/// Randomized delay for retry number `retry`, uniform in `[ceiling/2, ceiling]`.
///
/// Spreading retries keeps conflicting serializable writers from
/// re-colliding in lockstep.
pub fn jittered_delay(retry: u32, base: Duration, max: Duration) -> Duration {
    let ceiling = backoff_ceiling(retry, base, max);
    let hi = u64::try_from(ceiling.as_micros()).unwrap_or(u64::MAX);
    if hi == 0 {
        return Duration::ZERO;
    }
    let lo = hi / 2;
    Duration::from_micros(rand::rng().random_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ceiling_doubles_then_clamps() {
        let base = Duration::from_millis(10);
        let max = Duration::from_millis(50);
        assert_eq!(backoff_ceiling(1, base, max), Duration::from_millis(10));
        assert_eq!(backoff_ceiling(2, base, max), Duration::from_millis(20));
        assert_eq!(backoff_ceiling(3, base, max), Duration::from_millis(40));
        assert_eq!(backoff_ceiling(4, base, max), Duration::from_millis(50));
        assert_eq!(backoff_ceiling(60, base, max), Duration::from_millis(50));
    }

    #[test]
    fn test_zero_base_means_no_sleep() {
        assert_eq!(
            jittered_delay(3, Duration::ZERO, Duration::from_secs(1)),
            Duration::ZERO
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Jitter always stays within [ceiling/2, ceiling].
        #[test]
        fn prop_jitter_within_bounds(
            retry in 1u32..12,
            base_ms in 1u64..200,
            max_ms in 200u64..5000,
        ) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(max_ms);
            let ceiling = backoff_ceiling(retry, base, max);
            let delay = jittered_delay(retry, base, max);

            prop_assert!(delay <= ceiling);
            prop_assert!(delay >= ceiling / 2);
            prop_assert!(delay <= max);
        }
    }
}
