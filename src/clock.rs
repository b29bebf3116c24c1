//! Injected time source (§9 "Ambient time").
//!
//! Snapshots and checkpoints stamp every record with a creation instant.
//! Reading the wall clock directly from snapshot/checkpoint code would make
//! the engine's output non-deterministic and its tests time-dependent, so
//! every component that needs "now" takes a `&dyn Clock` instead.

use chrono::{DateTime, Utc};

/// A source of the current instant.
pub trait Clock: Send + Sync {
    /// Return the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the real wall clock. The default for production use.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to a fixed instant, or one that advances by a fixed step
/// on every call. Used in tests that need deterministic timestamps or a
/// strictly increasing sequence of them.
#[derive(Debug)]
pub struct FixedClock {
    current: std::sync::Mutex<DateTime<Utc>>,
    step: chrono::Duration,
}

impl FixedClock {
    /// A clock that always returns `at`.
    #[must_use]
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            current: std::sync::Mutex::new(at),
            step: chrono::Duration::zero(),
        }
    }

    /// A clock starting at `at` that advances by `step` on every `now()` call.
    #[must_use]
    pub fn ticking_from(at: DateTime<Utc>, step: chrono::Duration) -> Self {
        Self {
            current: std::sync::Mutex::new(at),
            step,
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        let mut guard = self.current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let value = *guard;
        *guard += self.step;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_returns_same_instant() {
        let at = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = FixedClock::at(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), at);
    }

    #[test]
    fn ticking_clock_advances() {
        let at = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = FixedClock::ticking_from(at, chrono::Duration::seconds(1));
        let a = clock.now();
        let b = clock.now();
        assert!(b > a);
    }
}
