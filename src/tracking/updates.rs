use crate::store::{ProgressRecord, VideoId};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::sync::mpsc as tokio_mpsc;

type SubscriptionId = u64;

/// Notifications published by the progress service
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Progress listing fetched; tracking is live
    Loaded { videos: usize },
    /// Progress listing failed; tracking stays inert for this service
    LoadFailed { message: String },
    /// Element was sought to the stored position on metadata load
    Resumed { video_id: VideoId, position: f64 },
    /// Store accepted a contribution; `record` is the new authoritative state
    Flushed {
        video_id: VideoId,
        record: ProgressRecord,
    },
    /// Pending time was already credited; nothing was sent
    AlreadyCredited { video_id: VideoId },
    /// Store refused the contribution as a rewatch
    RewatchNotCounted {
        video_id: VideoId,
        message: &'static str,
    },
    /// Flush failed; pending intervals are kept for the next one
    FlushFailed {
        video_id: VideoId,
        message: &'static str,
        error: String,
    },
    /// Store answered 401; the auth layer should invalidate the session
    Unauthorized { video_id: VideoId },
}

impl ProgressUpdate {
    pub fn video_id(&self) -> Option<VideoId> {
        match self {
            ProgressUpdate::Loaded { .. } | ProgressUpdate::LoadFailed { .. } => None,
            ProgressUpdate::Resumed { video_id, .. }
            | ProgressUpdate::Flushed { video_id, .. }
            | ProgressUpdate::AlreadyCredited { video_id }
            | ProgressUpdate::RewatchNotCounted { video_id, .. }
            | ProgressUpdate::FlushFailed { video_id, .. }
            | ProgressUpdate::Unauthorized { video_id } => Some(*video_id),
        }
    }
}

struct Subscription {
    /// `None` receives everything
    video_id: Option<VideoId>,
    tx: tokio_mpsc::UnboundedSender<ProgressUpdate>,
}

/// Fan-out of progress updates to any number of subscribers
#[derive(Clone, Default)]
pub struct ProgressUpdates {
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl ProgressUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every update
    /// Subscription is automatically removed when receiver is dropped
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<ProgressUpdate> {
        self.subscribe(None)
    }

    /// Subscribe to updates about one video, plus service-wide ones
    pub fn subscribe_video(&self, video_id: VideoId) -> tokio_mpsc::UnboundedReceiver<ProgressUpdate> {
        self.subscribe(Some(video_id))
    }

    fn subscribe(&self, video_id: Option<VideoId>) -> tokio_mpsc::UnboundedReceiver<ProgressUpdate> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Subscription { video_id, tx });
        rx
    }

    pub fn publish(&self, update: ProgressUpdate) {
        let target = update.video_id();
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // If send fails, receiver was dropped
        subs.retain(|_, sub| {
            let wanted = match (sub.video_id, target) {
                (Some(filter), Some(video_id)) => filter == video_id,
                _ => true,
            };
            !wanted || sub.tx.send(update.clone()).is_ok()
        });
    }
}
