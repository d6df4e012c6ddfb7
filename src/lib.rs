// Library exports for the embedding application and integration tests

pub mod config;
pub mod intervals;
pub mod store;
pub mod tracking;

pub use config::{Config, TrackerConfig};
pub use store::{HttpProgressStore, ProgressError, ProgressStore, VideoId};
pub use tracking::{MediaEvent, ProgressHandle, ProgressService, ProgressUpdate, TrackingScope};

// Test support (only available with test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
