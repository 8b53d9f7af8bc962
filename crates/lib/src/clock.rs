//! Time provider abstraction
//!
//! Every timestamp the engine produces (event validation, backoff schedules,
//! `syncedAt` stamps, notification times) comes from an injected [`Clock`],
//! so tests can pin time with [`FixedClock`] instead of sleeping.
//!
//! # Example
//!
//! ```
//! use guardsync::{Clock, FixedClock};
//!
//! let clock = FixedClock::new(1_704_067_200_000);
//! let before = clock.now();
//! clock.advance(5_000);
//! assert_eq!((clock.now() - before).num_seconds(), 5);
//! ```

use std::fmt::Debug;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync + Debug {
    /// Current time in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Production clock backed by [`chrono::Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock.
///
/// Time only moves when [`FixedClock::advance`] or [`FixedClock::set`] is
/// called, which keeps backoff schedules and timestamp bounds deterministic.
pub struct FixedClock {
    millis: Mutex<i64>,
}

impl FixedClock {
    /// Create a clock frozen at `millis` since the Unix epoch.
    pub fn new(millis: i64) -> Self {
        Self {
            millis: Mutex::new(millis),
        }
    }

    /// Move the clock forward by `ms` milliseconds.
    pub fn advance(&self, ms: i64) {
        *self.millis.lock().unwrap() += ms;
    }

    /// Jump to an absolute time.
    pub fn set(&self, ms: i64) {
        *self.millis.lock().unwrap() = ms;
    }

    /// Current reading in milliseconds.
    pub fn get(&self) -> i64 {
        *self.millis.lock().unwrap()
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.get();
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        // 2024-01-01 00:00:00 UTC
        Self::new(1_704_067_200_000)
    }
}

impl Clone for FixedClock {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Debug for FixedClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedClock")
            .field("millis", &self.get())
            .finish()
    }
}
