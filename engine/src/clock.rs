//! Clock abstraction for deterministic sessions.
//!
//! Production runs use `SystemClock` (real time).
//! Tests and offline runs use `TestClock` with manual time advancement.

use chrono::{DateTime, Local};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

/// A single reading of both time bases, taken once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// Monotonic instant used for deadlines and cadence.
    pub at: Instant,
    /// Wall-clock milliseconds since UNIX epoch, used in log rows.
    pub unix_ms: i64,
}

impl Timestamp {
    /// Wall-clock time in the local timezone.
    pub fn local(&self) -> DateTime<Local> {
        DateTime::from_timestamp_millis(self.unix_ms)
            .unwrap_or_default()
            .with_timezone(&Local)
    }
}

/// Trait abstracting time sources for testability.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time as milliseconds
    /// since UNIX epoch.
    fn unix_millis(&self) -> i64;

    /// Read both time bases at once.
    fn stamp(&self) -> Timestamp {
        Timestamp {
            at: self.now(),
            unix_ms: self.unix_millis(),
        }
    }
}

/// Production clock using real system time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> i64 {
        system_unix_millis()
    }
}

/// Test clock with manually controlled time.
pub struct TestClock {
    instant: Mutex<Instant>,
    unix_ms: Mutex<i64>,
}

impl TestClock {
    /// Create a test clock starting at the current real time.
    pub fn new() -> Self {
        Self {
            instant: Mutex::new(Instant::now()),
            unix_ms: Mutex::new(system_unix_millis()),
        }
    }

    /// Advance time by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut inst = self.instant.lock().unwrap_or_else(|e| e.into_inner());
        *inst += duration;
        let mut ms = self.unix_ms.lock().unwrap_or_else(|e| e.into_inner());
        *ms += duration.as_millis() as i64;
    }

    /// Set the UNIX millisecond timestamp explicitly.
    pub fn set_unix_millis(&self, ms: i64) {
        *self.unix_ms.lock().unwrap_or_else(|e| e.into_inner()) = ms;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.instant.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unix_millis(&self) -> i64 {
        *self.unix_ms.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn system_unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_system_clock_returns_time() {
        let clock = SystemClock;
        let now = clock.now();
        let ms = clock.unix_millis();
        assert!(ms > 0);
        // Monotonic: a second call should be >= first
        assert!(clock.now() >= now);
    }

    #[test]
    fn test_test_clock_advance() {
        let clock = TestClock::new();
        let t0 = clock.stamp();

        clock.advance(Duration::from_secs(5));

        let t1 = clock.stamp();
        assert_eq!(t1.at - t0.at, Duration::from_secs(5));
        assert_eq!(t1.unix_ms - t0.unix_ms, 5000);
    }

    #[test]
    fn test_timestamp_local_matches_millis() {
        let clock = TestClock::new();
        clock.set_unix_millis(1_700_000_000_123);
        let local = clock.stamp().local();
        assert_eq!(local.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_clock_trait_object() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        assert!(clock.unix_millis() > 0);

        let test_clock: Arc<dyn Clock> = Arc::new(TestClock::new());
        assert!(test_clock.stamp().unix_ms > 0);
    }
}
