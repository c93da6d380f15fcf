//! Deadline values shared by every operation in this crate.

use std::time::{Duration, Instant, SystemTime};

/// A point in time, or duration from now, by which an operation must
/// complete.
///
/// An absent deadline means "block forever". A zero deadline means "try
/// once, do not sleep". Deadlines may be either
/// steady (a monotonic duration from the call) or a system (wall-clock)
/// time point; both are normalised to a steady instant at construction so
/// that subsequent `remaining()` calls are monotonic regardless of clock
/// adjustments made while the operation is outstanding.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::never()
    }
}

impl Deadline {
    /// No deadline: block forever.
    pub fn never() -> Self {
        Deadline { expires_at: None }
    }

    /// Try once, do not sleep.
    pub fn zero() -> Self {
        Deadline {
            expires_at: Some(Instant::now()),
        }
    }

    /// A steady (monotonic) deadline, `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Deadline {
            expires_at: Instant::now().checked_add(duration),
        }
    }

    /// A system (wall-clock) deadline at the given absolute time.
    pub fn at_system_time(when: SystemTime) -> Self {
        let now_system = SystemTime::now();
        let now_steady = Instant::now();
        let expires_at = match when.duration_since(now_system) {
            Ok(remaining) => now_steady.checked_add(remaining),
            Err(_) => Some(now_steady), // already in the past
        };
        Deadline { expires_at }
    }

    /// A steady deadline at the given absolute instant.
    pub fn at_instant(when: Instant) -> Self {
        Deadline {
            expires_at: Some(when),
        }
    }

    /// True if this deadline will never expire.
    pub fn is_never(&self) -> bool {
        self.expires_at.is_none()
    }

    /// True if this deadline requires "try once, do not sleep" behaviour.
    pub fn is_zero(&self) -> bool {
        matches!(self.expires_at, Some(t) if t <= Instant::now())
    }

    /// True if the deadline has already elapsed.
    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(t) if Instant::now() >= t)
    }

    /// Time remaining until the deadline, or `None` if it never expires.
    /// Returns `Some(Duration::ZERO)` if already expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|t| t.saturating_duration_since(Instant::now()))
    }

    /// Remaining time rendered as a `poll(2)`-style millisecond timeout:
    /// `-1` for "never", otherwise the remaining milliseconds (rounded up,
    /// clamped to `i32::MAX`).
    pub fn as_poll_millis(&self) -> i32 {
        match self.remaining() {
            None => -1,
            Some(d) => {
                let millis = d
                    .checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(d)
                    .as_millis();
                millis.min(i32::MAX as u128) as i32
            }
        }
    }

    /// Returns a new deadline that expires at the earlier of `self` and
    /// `other`. Used when a caller loops issuing several sub-operations
    /// against one overall deadline.
    pub fn min(&self, other: Deadline) -> Deadline {
        match (self.expires_at, other.expires_at) {
            (None, x) => Deadline { expires_at: x },
            (x, None) => Deadline { expires_at: x },
            (Some(a), Some(b)) => Deadline {
                expires_at: Some(a.min(b)),
            },
        }
    }
}

impl From<Duration> for Deadline {
    fn from(d: Duration) -> Self {
        Deadline::after(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_has_no_remaining() {
        let d = Deadline::never();
        assert!(d.is_never());
        assert!(!d.is_expired());
        assert_eq!(d.as_poll_millis(), -1);
    }

    #[test]
    fn zero_is_expired_immediately() {
        let d = Deadline::zero();
        assert!(d.is_zero());
        std::thread::sleep(Duration::from_millis(1));
        assert!(d.is_expired());
    }

    #[test]
    fn after_rounds_up_to_whole_millisecond() {
        let d = Deadline::after(Duration::from_micros(1));
        assert_eq!(d.as_poll_millis(), 1);
    }

    #[test]
    fn min_picks_the_earlier() {
        let soon = Deadline::after(Duration::from_millis(10));
        let later = Deadline::after(Duration::from_secs(10));
        let m = soon.min(later);
        assert!(m.remaining().unwrap() <= Duration::from_millis(10));
    }
}
