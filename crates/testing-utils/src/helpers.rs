//! Test helper utilities and common testing patterns

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mission_core::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

/// Clock that only moves when a test tells it to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Build from an RFC 3339 timestamp, e.g. `2026-03-02T08:00:00Z`
    pub fn at(timestamp: &str) -> Self {
        Self::new(utc(timestamp))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(ChronoDuration::minutes(minutes));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Parse an RFC 3339 timestamp into UTC, panicking on bad test input
pub fn utc(timestamp: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(timestamp)
        .unwrap_or_else(|e| panic!("invalid test timestamp {timestamp}: {e}"))
        .with_timezone(&Utc)
}

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    ///
    /// Useful when a side effect happens on a spawned task,
    /// such as the dead-letter file writer.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }
}
