//! Exponential retry backoff schedule.

use std::time::Duration;

/// Delay before retry number `failures` (1-based):
/// `base * 2^min(failures - 1, 5)`, capped.
pub fn retry_delay(base: Duration, failures: u32, cap: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let exponent = (failures - 1).min(5);
    base.saturating_mul(1u32 << exponent).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(20);
    const CAP: Duration = Duration::from_secs(2);

    #[test]
    fn first_retry_uses_the_base_delay() {
        assert_eq!(retry_delay(BASE, 1, CAP), Duration::from_millis(20));
    }

    #[test]
    fn delay_doubles_per_failure() {
        assert_eq!(retry_delay(BASE, 2, CAP), Duration::from_millis(40));
        assert_eq!(retry_delay(BASE, 3, CAP), Duration::from_millis(80));
        assert_eq!(retry_delay(BASE, 4, CAP), Duration::from_millis(160));
    }

    #[test]
    fn exponent_saturates_at_five() {
        assert_eq!(retry_delay(BASE, 6, CAP), Duration::from_millis(640));
        assert_eq!(retry_delay(BASE, 60, CAP), Duration::from_millis(640));
    }

    #[test]
    fn delay_never_exceeds_the_cap() {
        let big_base = Duration::from_millis(500);
        assert_eq!(retry_delay(big_base, 4, CAP), CAP);
    }

    #[test]
    fn zero_failures_means_no_delay() {
        assert_eq!(retry_delay(BASE, 0, CAP), Duration::ZERO);
    }
}
