//! Tick-based timestamps.
//!
//! A tick is 100 ns, counted from the Unix epoch. Cell passes are stored at
//! whole-second resolution; the sub-second part of an incoming pass time is
//! dropped on insertion.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Point in time measured in 100 ns ticks since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Ticks in one second.
    pub const TICKS_PER_SECOND: i64 = 10_000_000;
    /// Earliest representable time; lower bound of an unbounded segment.
    pub const MIN: Self = Self(i64::MIN);
    /// Latest representable time; upper bound of an unbounded segment.
    pub const MAX: Self = Self(i64::MAX);

    #[must_use]
    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    #[must_use]
    pub const fn from_seconds(seconds: i64) -> Self {
        Self(seconds.saturating_mul(Self::TICKS_PER_SECOND))
    }

    #[must_use]
    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// Whole seconds, rounded toward negative infinity.
    #[must_use]
    pub const fn whole_seconds(self) -> i64 {
        self.0.div_euclid(Self::TICKS_PER_SECOND)
    }

    /// Drop the sub-second part.
    #[must_use]
    pub const fn truncate_to_second(self) -> Self {
        Self(self.whole_seconds().saturating_mul(Self::TICKS_PER_SECOND))
    }

    /// Whether two instants fall within the same whole second.
    #[must_use]
    pub const fn same_second(self, other: Self) -> bool {
        self.whole_seconds() == other.whole_seconds()
    }

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let ticks = elapsed.as_nanos() / 100;
        Self(i64::try_from(ticks).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MIN => f.write_str("-inf"),
            Self::MAX => f.write_str("+inf"),
            _ => write!(f, "{}s", self.whole_seconds()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_round_trip() {
        let t = Timestamp::from_seconds(300);
        assert_eq!(t.ticks(), 3_000_000_000);
        assert_eq!(t.whole_seconds(), 300);
    }

    #[test]
    fn test_truncate_drops_sub_second() {
        let t = Timestamp::from_ticks(Timestamp::TICKS_PER_SECOND * 5 + 4_999_999);
        assert_eq!(t.truncate_to_second(), Timestamp::from_seconds(5));
        assert!(t.same_second(Timestamp::from_seconds(5)));
        assert!(!t.same_second(Timestamp::from_seconds(6)));
    }

    #[test]
    fn test_negative_ticks_floor() {
        let t = Timestamp::from_ticks(-1);
        assert_eq!(t.whole_seconds(), -1);
        assert_eq!(t.truncate_to_second(), Timestamp::from_seconds(-1));
    }

    #[test]
    fn test_extremes_do_not_overflow() {
        assert_eq!(Timestamp::MIN.truncate_to_second(), Timestamp::MIN);
        assert_eq!(Timestamp::MAX.to_string(), "+inf");
        assert_eq!(Timestamp::MIN.to_string(), "-inf");
        assert_eq!(Timestamp::from_seconds(7).to_string(), "7s");
    }
}
