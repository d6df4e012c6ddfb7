// Test support utilities for both unit and integration tests

use crate::intervals::{merge, IntervalSet};
use crate::store::{
    ProgressError, ProgressRecord, ProgressStore, ProgressUpdateRequest, VideoId, VideoSummary,
};
use crate::tracking::MediaElement;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// In-memory progress store for testing
///
/// Accumulates submitted intervals per video the way a simple server would:
/// union of everything credited, percent as coverage of the duration.
#[derive(Default)]
pub struct MockProgressStore {
    records: Mutex<HashMap<VideoId, ProgressRecord>>,
    requests: Mutex<Vec<ProgressUpdateRequest>>,
    attempts: AtomicUsize,
    failing_updates: AtomicUsize,
    overlap_rejections: AtomicUsize,
    fail_fetch: AtomicBool,
    held: AtomicBool,
    release: Notify,
}

impl MockProgressStore {
    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a video with no progress yet
    pub fn add_video(&self, video_id: VideoId, duration: Option<f64>) {
        self.insert_record(video_id, duration, IntervalSet::new(), 0.0);
    }

    /// Register a video with already credited intervals
    pub fn insert_record(
        &self,
        video_id: VideoId,
        duration: Option<f64>,
        confirmed: IntervalSet,
        last_watched_position: f64,
    ) {
        let video = VideoSummary {
            id: video_id,
            duration,
            title: format!("Video {}", video_id),
            description: String::new(),
            uploaded_by: Some("admin".to_string()),
            created_at: None,
        };
        let record = ProgressRecord {
            percent_watched: percent_of(&confirmed, duration),
            last_watched_position,
            confirmed_intervals: confirmed,
            video,
        };
        self.records.lock().unwrap().insert(video_id, record);
    }

    pub fn record(&self, video_id: VideoId) -> Option<ProgressRecord> {
        self.records.lock().unwrap().get(&video_id).cloned()
    }

    /// Requests that reached the store, failed ones included
    pub fn requests(&self) -> Vec<ProgressUpdateRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn update_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Next `n` updates fail with a transient error
    pub fn fail_next_updates(&self, n: usize) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    pub fn reject_next_update_as_overlap(&self) {
        self.overlap_rejections.store(1, Ordering::SeqCst);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Park every update until [`release_updates`](Self::release_updates)
    pub fn hold_updates(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_updates(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    /// Wait until at least `n` update attempts arrived
    pub async fn wait_for_attempts(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.update_attempts() < n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    async fn wait_until_released(&self) {
        loop {
            let notified = self.release.notified();
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn percent_of(confirmed: &IntervalSet, duration: Option<f64>) -> f64 {
    match duration {
        Some(d) if d > 0.0 => (confirmed.total_duration() * 100.0 / d).min(100.0),
        _ => 0.0,
    }
}

#[async_trait::async_trait]
impl ProgressStore for MockProgressStore {
    async fn fetch_progress(&self) -> Result<Vec<ProgressRecord>, ProgressError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ProgressError::Unavailable("progress listing failed".to_string()));
        }
        let mut records: Vec<ProgressRecord> =
            self.records.lock().unwrap().values().cloned().collect();
        records.sort_by_key(|r| r.video.id);
        Ok(records)
    }

    async fn update_progress(
        &self,
        request: &ProgressUpdateRequest,
    ) -> Result<ProgressRecord, ProgressError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.wait_until_released().await;

        if take_one(&self.failing_updates) {
            return Err(ProgressError::Unavailable("store offline".to_string()));
        }
        if take_one(&self.overlap_rejections) {
            return Err(ProgressError::Overlap(
                "Interval overlaps existing progress".to_string(),
            ));
        }

        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&request.video_id)
            .ok_or_else(|| ProgressError::Status {
                status: 404,
                message: format!("Video {} not found", request.video_id),
            })?;

        let submitted = request.interval_set();
        record.confirmed_intervals = merge(
            record
                .confirmed_intervals
                .iter()
                .chain(submitted.iter())
                .copied(),
        );
        record.percent_watched = percent_of(&record.confirmed_intervals, record.video.duration);
        record.last_watched_position = match record.video.duration {
            Some(d) => request.current_time.clamp(0.0, d),
            None => request.current_time.max(0.0),
        };

        Ok(record.clone())
    }
}

/// Media element that remembers every seek
#[derive(Default)]
pub struct RecordingElement {
    seeks: Mutex<Vec<f64>>,
}

impl RecordingElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.seeks.lock().unwrap().clone()
    }
}

impl MediaElement for RecordingElement {
    fn seek(&self, position: f64) {
        self.seeks.lock().unwrap().push(position);
    }
}
