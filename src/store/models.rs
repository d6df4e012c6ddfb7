use crate::intervals::IntervalSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a video in the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub u64);

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VideoId {
    fn from(id: u64) -> Self {
        VideoId(id)
    }
}

/// Video metadata embedded in progress payloads
///
/// Only `id` and `duration` matter for tracking; the rest is carried along for
/// display and defaults when the store leaves it out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoSummary {
    pub id: VideoId,
    /// Length in seconds; `None` when the store has not probed the file yet
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uploaded_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl VideoSummary {
    /// Duration usable for clipping and resume, if any
    pub fn known_duration(&self) -> Option<f64> {
        self.duration.filter(|d| d.is_finite() && *d > 0.0)
    }
}

/// Authoritative progress of one video for the current user
///
/// Only ever built from a store response.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub video: VideoSummary,
    /// 0..=100, as computed by the store
    pub percent_watched: f64,
    pub last_watched_position: f64,
    pub confirmed_intervals: IntervalSet,
}

impl ProgressRecord {
    /// Last watched position clamped to `[0, duration]` for display
    pub fn clamped_position(&self, duration: Option<f64>) -> f64 {
        let position = if self.last_watched_position.is_finite() {
            self.last_watched_position.max(0.0)
        } else {
            0.0
        };
        match duration.or(self.video.known_duration()) {
            Some(d) if d.is_finite() && d > 0.0 => position.min(d),
            _ => position,
        }
    }

    /// Seconds credited by the store, overlap counted once
    pub fn watched_seconds(&self) -> f64 {
        self.confirmed_intervals.total_duration()
    }
}
