//! Monotonic timestamps for partial-message ages and assembly latency.
//!
//! Readings are plain `u64` nanoseconds so they can live inside store entries
//! and be compared without an `Instant` per entry. The origin is arbitrary.

use std::time::Duration;

/// `CLOCK_MONOTONIC_RAW` reading in nanoseconds (immune to NTP slew).
#[cfg(target_os = "linux")]
#[inline]
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // SAFETY: `ts` is a valid out-pointer for the duration of the call.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) };
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Nanoseconds since the first call in this process.
#[cfg(not(target_os = "linux"))]
#[inline]
pub fn now_ns() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Time from `earlier` to `later`; zero if the readings are out of order.
#[inline]
pub fn between(earlier: u64, later: u64) -> Duration {
    Duration::from_nanos(later.saturating_sub(earlier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ns_is_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
        assert!(between(a, b) < Duration::from_secs(1));
    }

    #[test]
    fn test_between_saturates() {
        assert_eq!(between(10, 5), Duration::ZERO);
        assert_eq!(between(1_000, 3_000), Duration::from_nanos(2_000));
    }
}
