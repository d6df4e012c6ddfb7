use crate::config::TrackerConfig;
use crate::intervals::{normalize_pending, subtract_confirmed, Interval, IntervalSet};
use crate::store::{ProgressError, ProgressRecord, ProgressStore, ProgressUpdateRequest, VideoId};
use crate::tracking::session::PlaybackSession;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Cached copy of the store's authoritative progress, keyed by video
///
/// Readers get clones; only [`ProgressSynchronizer`] writes, and only with
/// records returned by the store.
#[derive(Clone, Default)]
pub struct ProgressCache {
    records: Arc<RwLock<HashMap<VideoId, ProgressRecord>>>,
}

impl ProgressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, video_id: VideoId) -> Option<ProgressRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&video_id)
            .cloned()
    }

    pub fn percent_watched(&self, video_id: VideoId) -> Option<f64> {
        self.get(video_id).map(|r| r.percent_watched)
    }

    pub fn last_watched_position(&self, video_id: VideoId) -> Option<f64> {
        self.get(video_id).map(|r| r.clamped_position(None))
    }

    pub fn video_ids(&self) -> Vec<VideoId> {
        let mut ids: Vec<VideoId> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn confirmed(&self, video_id: VideoId) -> (IntervalSet, Option<f64>) {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        match records.get(&video_id) {
            Some(r) => (r.confirmed_intervals.clone(), r.video.known_duration()),
            None => (IntervalSet::new(), None),
        }
    }

    fn replace(&self, video_id: VideoId, record: ProgressRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(video_id, record);
    }

    fn seed(&self, records: Vec<ProgressRecord>) {
        let mut map = self.records.write().unwrap_or_else(PoisonError::into_inner);
        map.clear();
        for record in records {
            map.insert(record.video.id, record);
        }
    }
}

/// A contribution ready to be sent, with the pending intervals it came from
#[derive(Debug, Clone)]
pub struct FlushJob {
    pub request: ProgressUpdateRequest,
    pub batch: Vec<Interval>,
}

#[derive(Debug, Clone)]
pub enum FlushPlan {
    /// Nothing pending; no request
    Idle,
    /// Everything pending was already credited; pending cleared, no request
    AlreadyCredited,
    /// A flush for this video is in flight; this one runs when it resolves
    Deferred,
    Submit(FlushJob),
}

#[derive(Debug)]
pub enum FlushOutcome {
    Credited(ProgressRecord),
    /// Store refused the contribution as overlapping; the batch is dropped
    RewatchNotCounted(ProgressError),
    /// Batch returned to pending for a later flush
    Failed(ProgressError),
}

#[derive(Debug)]
pub struct FlushCompletion {
    pub outcome: FlushOutcome,
    /// A flush was requested while this one was in flight
    pub rerun: bool,
}

/// Turns pending intervals into store requests and folds responses back in
///
/// Keeps at most one request in flight per video.
pub struct ProgressSynchronizer {
    cache: ProgressCache,
    in_flight: HashSet<VideoId>,
    deferred: HashSet<VideoId>,
}

impl ProgressSynchronizer {
    pub fn new(cache: ProgressCache) -> Self {
        Self {
            cache,
            in_flight: HashSet::new(),
            deferred: HashSet::new(),
        }
    }

    pub fn cache(&self) -> &ProgressCache {
        &self.cache
    }

    /// Replace the whole cache with a fresh store listing
    pub fn seed(&self, records: Vec<ProgressRecord>) {
        self.cache.seed(records);
    }

    pub fn is_in_flight(&self, video_id: VideoId) -> bool {
        self.in_flight.contains(&video_id)
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Decide what a flush of `session` should do right now
    pub fn plan(&mut self, session: &mut PlaybackSession) -> FlushPlan {
        let video_id = session.video_id();

        if self.in_flight.contains(&video_id) {
            if session.has_pending() {
                self.deferred.insert(video_id);
            }
            return FlushPlan::Deferred;
        }

        if !session.has_pending() {
            return FlushPlan::Idle;
        }

        let (confirmed, store_duration) = self.cache.confirmed(video_id);
        let duration = session.duration().or(store_duration);
        let contribution = subtract_confirmed(&normalize_pending(session.pending(), duration), &confirmed);

        if contribution.is_empty() {
            debug!("Video {}: pending time already credited, dropping", video_id);
            session.clear_pending();
            return FlushPlan::AlreadyCredited;
        }

        let current_time = match duration {
            Some(d) => session.last_known_position().clamp(0.0, d),
            None => session.last_known_position().max(0.0),
        };

        let batch = session.take_pending();
        self.in_flight.insert(video_id);

        FlushPlan::Submit(FlushJob {
            request: ProgressUpdateRequest::new(video_id, current_time, &contribution),
            batch,
        })
    }

    /// Apply the result of a submitted flush
    ///
    /// `session` is `None` when the session is already gone; a failed batch
    /// is then dropped.
    pub fn complete(
        &mut self,
        video_id: VideoId,
        batch: Vec<Interval>,
        result: Result<ProgressRecord, ProgressError>,
        session: Option<&mut PlaybackSession>,
    ) -> FlushCompletion {
        self.in_flight.remove(&video_id);
        let rerun = self.deferred.remove(&video_id);

        let outcome = match result {
            Ok(record) => {
                if record.video.id != video_id {
                    warn!(
                        "Video {}: store answered with record for video {}",
                        video_id, record.video.id
                    );
                }
                self.cache.replace(video_id, record.clone());
                FlushOutcome::Credited(record)
            }
            Err(error) if error.is_overlap() => FlushOutcome::RewatchNotCounted(error),
            Err(error) => {
                match session {
                    Some(session) => session.restore_pending(batch),
                    None => warn!(
                        "Video {}: flush failed after session ended, {} interval(s) lost",
                        video_id,
                        batch.len()
                    ),
                }
                FlushOutcome::Failed(error)
            }
        };

        FlushCompletion { outcome, rerun }
    }
}

/// Send one request, retrying transient failures with linear backoff
pub async fn submit_with_retry(
    store: &dyn ProgressStore,
    request: &ProgressUpdateRequest,
    config: &TrackerConfig,
) -> Result<ProgressRecord, ProgressError> {
    let max_attempts = config.max_flush_attempts.max(1);
    let mut attempt = 1;

    loop {
        match store.update_progress(request).await {
            Ok(record) => return Ok(record),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    "Video {}: flush attempt {}/{} failed: {}",
                    request.video_id, attempt, max_attempts, e
                );
                tokio::time::sleep(config.retry_backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
