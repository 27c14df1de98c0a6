use std::time::Duration;

use rand::Rng;

/// Whether the kiosk should back off on the "active" or "idle" curve
/// (`spec.md` §4.8's adaptive backoff). A headless kiosk has no page
/// visibility signal, so `Active` is the default and `Idle` exists for
/// parity with the spec and for renderers that do have one (e.g. a
/// terminal front end that detects an unattended session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Idle,
}

impl Activity {
    fn factor(self) -> f64 {
        match self {
            Activity::Active => 1.7,
            Activity::Idle => 2.0,
        }
    }

    fn max_seconds(self) -> f64 {
        match self {
            Activity::Active => 45.0,
            Activity::Idle => 300.0,
        }
    }
}

/// Adaptive backoff for the status-first polling loop: grows geometrically
/// with the `304` streak, clamped to the activity-dependent ceiling.
/// Jitter is applied separately by the caller (via [`jittered`]) so this
/// stays a pure, easily-tested function.
pub fn adaptive_backoff_seconds(base_s: f64, status_304_streak: u32, activity: Activity) -> f64 {
    let raw = base_s * activity.factor().powi(status_304_streak as i32);
    raw.min(activity.max_seconds())
}

/// First-load / network-failure retry backoff: `2 * 1.5^k`, capped at 30s.
pub fn first_load_retry_seconds(attempt: u32) -> f64 {
    (2.0 * 1.5_f64.powi(attempt as i32)).min(30.0)
}

/// Applies `spec.md`'s uniform ±25% jitter to a base duration.
pub fn jittered(base_seconds: f64, rng: &mut impl Rng) -> Duration {
    let factor = rng.gen_range(0.75..=1.25);
    Duration::from_secs_f64((base_seconds * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_backoff_grows_geometrically_with_the_304_streak() {
        let s0 = adaptive_backoff_seconds(30.0, 0, Activity::Active);
        let s1 = adaptive_backoff_seconds(30.0, 1, Activity::Active);
        let s2 = adaptive_backoff_seconds(30.0, 2, Activity::Active);
        assert_eq!(s0, 30.0);
        assert!((s1 - 51.0).abs() < 1e-9);
        assert!(s2 > s1);
    }

    #[test]
    fn adaptive_backoff_is_clamped_to_the_activity_ceiling() {
        let active = adaptive_backoff_seconds(30.0, 20, Activity::Active);
        let idle = adaptive_backoff_seconds(30.0, 20, Activity::Idle);
        assert_eq!(active, 45.0);
        assert_eq!(idle, 300.0);
    }

    #[test]
    fn first_load_retry_grows_then_clamps_at_thirty_seconds() {
        assert_eq!(first_load_retry_seconds(0), 2.0);
        assert!(first_load_retry_seconds(3) > first_load_retry_seconds(0));
        assert_eq!(first_load_retry_seconds(20), 30.0);
    }

    #[test]
    fn jitter_stays_within_twenty_five_percent_of_the_base() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let d = jittered(10.0, &mut rng).as_secs_f64();
            assert!((7.5..=12.5).contains(&d), "jittered value {d} out of band");
        }
    }
}
