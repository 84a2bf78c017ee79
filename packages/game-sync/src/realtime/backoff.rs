use std::time::Duration;

use rand::random;

use crate::config::BackoffPolicy;

/// Delay before reconnect attempt number `attempt` (1-based).
///
/// `initial * multiplier^(attempt - 1)`, capped at `max`, then jittered by
/// up to `jitter_percent` in either direction. Never below 100ms unless the
/// policy itself is shorter and unjittered.
pub fn delay_for(policy: &BackoffPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let base = policy.initial.as_secs_f64() * policy.multiplier.powi(exponent);
    let capped = base.min(policy.max.as_secs_f64());

    if policy.jitter_percent <= 0.0 {
        return Duration::from_secs_f64(capped.max(0.0));
    }

    let jitter_range = capped * policy.jitter_percent;
    let jitter = (random::<f64>() * 2.0 - 1.0) * jitter_range;
    Duration::from_secs_f64((capped + jitter).max(0.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        let policy = BackoffPolicy {
            jitter_percent: 0.0,
            ..BackoffPolicy::default()
        };
        assert_eq!(delay_for(&policy, 1), Duration::from_millis(500));
        assert_eq!(delay_for(&policy, 2), Duration::from_secs(1));
        assert_eq!(delay_for(&policy, 3), Duration::from_secs(2));
        assert_eq!(delay_for(&policy, 20), Duration::from_secs(30));
        assert_eq!(delay_for(&policy, u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = BackoffPolicy::default();
        for _ in 0..200 {
            let d = delay_for(&policy, 4).as_secs_f64();
            assert!((3.2..=4.8).contains(&d), "delay {d} outside jitter band");
        }
    }

    #[test]
    fn fixed_policy_is_exact() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(10));
        assert_eq!(delay_for(&policy, 1), Duration::from_millis(10));
        assert_eq!(delay_for(&policy, 9), Duration::from_millis(10));
    }
}
