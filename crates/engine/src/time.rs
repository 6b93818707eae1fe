use std::ops::Add;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shard clock in milliseconds since the loop started.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GameTime(u64);

impl GameTime {
    pub const ZERO: GameTime = GameTime(0);

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(millis))
    }

    /// Elapsed time since `earlier`, zero when `earlier` is in the future.
    pub fn saturating_since(self, earlier: GameTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    pub fn has_reached(self, deadline: GameTime) -> bool {
        self >= deadline
    }
}

impl Add<Duration> for GameTime {
    type Output = GameTime;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_saturates_for_future_timestamps() {
        let early = GameTime::from_secs(5);
        let late = GameTime::from_secs(9);
        assert_eq!(late.saturating_since(early), Duration::from_secs(4));
        assert_eq!(early.saturating_since(late), Duration::ZERO);
    }

    #[test]
    fn add_duration_moves_deadline_forward() {
        let start = GameTime::from_millis(250);
        let deadline = start + Duration::from_millis(750);
        assert_eq!(deadline.as_millis(), 1000);
        assert!(GameTime::from_secs(1).has_reached(deadline));
        assert!(!GameTime::from_millis(999).has_reached(deadline));
    }
}
