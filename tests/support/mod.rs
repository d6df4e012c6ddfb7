#![allow(dead_code)]

pub mod fake_server;

use std::time::Duration;
use watchtrack::intervals::{merge, Interval, IntervalSet};
use watchtrack::TrackerConfig;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn spans(spans: &[(f64, f64)]) -> IntervalSet {
    merge(spans.iter().filter_map(|&(s, e)| Interval::new(s, e)))
}

/// Tracker config with retries fast enough for tests
pub fn fast_tracker() -> TrackerConfig {
    TrackerConfig {
        retry_backoff: Duration::from_millis(1),
        ..TrackerConfig::default()
    }
}
