//! Random forward shift of refresh instants.

use rand::Rng;
use std::time::Duration;
use time::OffsetDateTime;

/// Default fixed offset added to every refreshed instant.
pub const DEFAULT_JITTER_START: Duration = Duration::from_secs(5 * 60);

/// Default width of the random window added on top of the fixed offset.
pub const DEFAULT_JITTER_RANGE: Duration = Duration::from_secs(5 * 60);

/// Additive jitter applied to the instants of a freshly produced snapshot.
///
/// Spreads the refresh moments of many cache instances so they do not hit the
/// token endpoint in lockstep. The shift is always forward in time:
/// `t + start + uniform(0, range)`. A zero `range` disables jitter entirely and
/// returns `t` unchanged, including the fixed `start` offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Jitter {
    /// Fixed offset added to the instant when jitter is enabled.
    pub start: Duration,
    /// Width of the uniformly distributed random window.
    pub range: Duration,
}

impl Default for Jitter {
    fn default() -> Self {
        Self {
            start: DEFAULT_JITTER_START,
            range: DEFAULT_JITTER_RANGE,
        }
    }
}

impl Jitter {
    /// Jitter that leaves every instant untouched.
    pub const fn none() -> Self {
        Self {
            start: Duration::ZERO,
            range: Duration::ZERO,
        }
    }

    /// Returns `true` if [`Jitter::apply`] is the identity.
    pub const fn is_disabled(&self) -> bool {
        self.range.is_zero()
    }

    /// Shifts `time` by `start` plus a random amount in `[0, range)`.
    ///
    /// If the shifted instant is not representable, `time` is returned as is.
    pub fn apply(&self, time: OffsetDateTime) -> OffsetDateTime {
        if self.is_disabled() {
            return time;
        }
        let offset = rand::rng().random_range(Duration::ZERO..self.range);
        time::Duration::try_from(self.start.saturating_add(offset))
            .ok()
            .and_then(|shift| time.checked_add(shift))
            .unwrap_or(time)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::days(1)
    }

    #[test]
    fn zero_range_is_identity() {
        let jitter = Jitter {
            start: Duration::from_secs(600),
            range: Duration::ZERO,
        };
        assert_eq!(jitter.apply(base()), base());
        assert_eq!(Jitter::none().apply(base()), base());
    }

    #[test]
    fn jitter_stays_within_window() {
        let jitter = Jitter::default();
        for _ in 0..1_000 {
            let shifted = jitter.apply(base());
            assert!(shifted >= base() + jitter.start);
            assert!(shifted <= base() + jitter.start + jitter.range);
        }
    }

    #[test]
    fn jitter_is_additive_even_with_zero_start() {
        let jitter = Jitter {
            start: Duration::ZERO,
            range: Duration::from_millis(10),
        };
        for _ in 0..100 {
            assert!(jitter.apply(base()) >= base());
        }
    }

    #[test]
    fn shift_past_the_last_representable_instant_keeps_the_original() {
        // 9999-12-31T23:59:00Z
        let last_minute = OffsetDateTime::from_unix_timestamp(253_402_300_740).unwrap();
        assert_eq!(Jitter::default().apply(last_minute), last_minute);

        let huge = Jitter {
            start: Duration::MAX,
            range: Duration::from_secs(1),
        };
        assert_eq!(huge.apply(base()), base());
    }
}
