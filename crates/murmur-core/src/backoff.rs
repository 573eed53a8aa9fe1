//! Per-destination retry schedule.
//!
//! Delays are counted in relay ticks (one tick per relay cycle, one second by
//! default). The table spreads 720 attempts over roughly 48 hours, then
//! plateaus at the last band.

use chrono::Utc;
use murmur_store::EndpointStats;

/// `(band size, delay in ticks)`, consumed in order.
pub const BACKOFF_BANDS: [(u32, u32); 6] = [
    (60, 15),
    (90, 30),
    (120, 60),
    (90, 120),
    (216, 300),
    (144, 600),
];

/// Delay applied once the table is exhausted.
pub const PLATEAU_DELAY: u32 = 600;

/// Delay for a destination that has failed `fail_streak` times in a row.
pub fn delay_for_streak(fail_streak: u32) -> u32 {
    let mut upper = 0u32;
    for (size, delay) in BACKOFF_BANDS {
        upper = upper.saturating_add(size);
        if fail_streak <= upper {
            return delay;
        }
    }
    PLATEAU_DELAY
}

/// Decide whether a delivery may be attempted this tick, advancing the
/// countdown. Returns `true` only when an attempt should be made.
///
/// A healthy destination always proceeds. A failing one first gets a delay
/// computed from its streak (refusing that tick), then refuses once per tick
/// until the countdown runs out, after which exactly one attempt proceeds.
pub fn should_relay_now(stats: &mut EndpointStats) -> bool {
    if stats.fail_streak == 0 {
        stats.current_delay = 0;
        stats.delay_elapsed = false;
        return true;
    }
    if stats.current_delay > 0 {
        stats.current_delay -= 1;
        if stats.current_delay == 0 {
            stats.delay_elapsed = true;
        }
        return false;
    }
    if stats.delay_elapsed {
        stats.delay_elapsed = false;
        return true;
    }
    stats.current_delay = delay_for_streak(stats.fail_streak);
    tracing::debug!(
        endpoint = %stats.endpoint,
        fail_streak = stats.fail_streak,
        delay = stats.current_delay,
        "Backing off destination"
    );
    false
}

pub fn record_failure(stats: &mut EndpointStats) {
    stats.fail_streak = stats.fail_streak.saturating_add(1);
    stats.delay_elapsed = false;
}

pub fn record_success(stats: &mut EndpointStats) {
    stats.fail_streak = 0;
    stats.current_delay = 0;
    stats.delay_elapsed = false;
    stats.last_contact_out = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(fail_streak: u32) -> EndpointStats {
        let mut s = EndpointStats::new("i2p://peer.b32.i2p/bob");
        s.fail_streak = fail_streak;
        s
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(delay_for_streak(1), 15);
        assert_eq!(delay_for_streak(59), 15);
        assert_eq!(delay_for_streak(60), 15);
        assert_eq!(delay_for_streak(61), 30);
        assert_eq!(delay_for_streak(150), 30);
        assert_eq!(delay_for_streak(270), 60);
        assert_eq!(delay_for_streak(360), 120);
        assert_eq!(delay_for_streak(576), 300);
        assert_eq!(delay_for_streak(599), 600);
        assert_eq!(delay_for_streak(600), 600);
        assert_eq!(delay_for_streak(720), 600);
        assert_eq!(delay_for_streak(u32::MAX), PLATEAU_DELAY);
    }

    #[test]
    fn test_delay_is_monotonic() {
        let mut last = 0;
        for streak in 1..=1000 {
            let d = delay_for_streak(streak);
            assert!(d >= last, "delay dropped at streak {streak}");
            last = d;
        }
    }

    #[test]
    fn test_healthy_destination_always_proceeds() {
        let mut s = stats(0);
        for _ in 0..10 {
            assert!(should_relay_now(&mut s));
            assert_eq!(s.current_delay, 0);
        }
    }

    #[test]
    fn test_zero_delay_recomputes_and_refuses() {
        let mut s = stats(60);
        assert!(!should_relay_now(&mut s));
        assert_eq!(s.current_delay, 15);
    }

    #[test]
    fn test_countdown_then_single_attempt() {
        let mut s = stats(1);
        assert!(!should_relay_now(&mut s)); // computes delay 15
        for _ in 0..15 {
            assert!(!should_relay_now(&mut s));
        }
        assert_eq!(s.current_delay, 0);
        assert!(should_relay_now(&mut s));

        // Another failure starts a new countdown.
        record_failure(&mut s);
        assert_eq!(s.fail_streak, 2);
        assert!(!should_relay_now(&mut s));
        assert_eq!(s.current_delay, 15);
    }

    #[test]
    fn test_success_resets_streak() {
        let mut s = stats(400);
        s.current_delay = 77;
        record_success(&mut s);
        assert_eq!(s.fail_streak, 0);
        assert_eq!(s.current_delay, 0);
        assert!(s.last_contact_out.is_some());
        assert!(should_relay_now(&mut s));
    }

    #[test]
    fn test_failure_saturates() {
        let mut s = stats(u32::MAX);
        record_failure(&mut s);
        assert_eq!(s.fail_streak, u32::MAX);
    }
}
