//! Monotonic versions for ordering permission updates across nodes.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A wall-clock microsecond timestamp with a tiebreaker, totally ordered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimedVersion {
    unix_micro: i64,
    ticks: i32,
}

impl TimedVersion {
    #[must_use]
    pub fn new(unix_micro: i64, ticks: i32) -> Self {
        Self { unix_micro, ticks }
    }

    #[must_use]
    pub fn after(&self, other: &Self) -> bool {
        self > other
    }

    /// Advance to `other` if it is newer.
    pub fn update(&mut self, other: &Self) {
        if other.after(self) {
            *self = *other;
        }
    }
}

impl fmt::Display for TimedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.unix_micro, self.ticks)
    }
}

/// Issues strictly increasing [`TimedVersion`]s from the local clock.
/// Versions minted within the same microsecond are ordered by tick.
#[derive(Debug, Default)]
pub struct TimedVersionGenerator {
    last: Mutex<TimedVersion>,
}

impl TimedVersionGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> TimedVersion {
        let now_micro = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);

        let mut last = self.last.lock();
        let version = if now_micro > last.unix_micro {
            TimedVersion::new(now_micro, 0)
        } else {
            TimedVersion::new(last.unix_micro, last.ticks + 1)
        };
        *last = version;
        version
    }
}
