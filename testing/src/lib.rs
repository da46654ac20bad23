//! # Courtside Testing
//!
//! Testing utilities for the Courtside booking engine.
//!
//! This crate provides:
//! - A deterministic, advanceable clock (`ManualClock`)
//! - A Given-When-Then harness for reducers (`ReducerTest`)
//! - Assertion helpers for effect lists
//!
//! ## Example
//!
//! ```ignore
//! use courtside_testing::test_clock;
//!
//! let clock = test_clock();
//! // ... create a reservation ...
//! clock.advance(chrono::Duration::minutes(16)); // hold has lapsed
//! ```

use chrono::{DateTime, Utc};
use courtside_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Clock that only moves when a test tells it to.
    ///
    /// Clones share the same instant, so a test can keep one handle and
    /// give another to the engine under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward (or backward, with a negative duration)
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.write() {
                *time += by;
            }
        }

        /// Jump to an absolute instant
        pub fn set(&self, to: DateTime<Utc>) {
            if let Ok(mut time) = self.time.write() {
                *time = to;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.read().map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Manual clock frozen at 2025-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> ManualClock {
        ManualClock::starting_at(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, ManualClock};
pub use reducer_test::{assertions, ReducerTest};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_clock_stands_still() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn manual_clock_advances_for_every_handle() {
        let start = test_clock().now();
        let clock = ManualClock::starting_at(start);
        let shared = clock.clone();
        clock.advance(Duration::minutes(15));
        assert_eq!(shared.now(), start + Duration::minutes(15));

        shared.set(start);
        assert_eq!(clock.now(), start);
    }
}
