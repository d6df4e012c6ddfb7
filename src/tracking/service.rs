use crate::config::TrackerConfig;
use crate::intervals::Interval;
use crate::store::{ProgressError, ProgressRecord, ProgressStore, VideoId};
use crate::tracking::resume::{apply_resume, MediaElement};
use crate::tracking::session::{FlushReason, MediaEvent, PlaybackSession};
use crate::tracking::sync::{
    submit_with_retry, FlushOutcome, FlushPlan, ProgressCache, ProgressSynchronizer,
};
use crate::tracking::updates::{ProgressUpdate, ProgressUpdates};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Commands sent to the service
enum ProgressCommand {
    Mount {
        video_id: VideoId,
        element: Option<Arc<dyn MediaElement>>,
    },
    Media {
        video_id: VideoId,
        event: MediaEvent,
    },
    LoadedMetadata {
        video_id: VideoId,
        duration: Option<f64>,
        current_position: f64,
    },
    Flush(VideoId),
    Unmount(VideoId),
    FlushAll(Option<oneshot::Sender<()>>),
    Snapshot {
        video_id: VideoId,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
}

/// Result of a submitted flush, reported back by the request task
struct FlushFinished {
    video_id: VideoId,
    batch: Vec<Interval>,
    result: Result<ProgressRecord, ProgressError>,
}

/// Point-in-time view of a tracked session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub video_id: VideoId,
    pub is_playing: bool,
    pub segment_start: Option<f64>,
    pub pending: Vec<Interval>,
    pub last_known_position: f64,
    pub mounted: bool,
    pub flush_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Ready,
    /// Initial listing failed; nothing is credited
    Inert,
}

struct TrackedVideo {
    session: PlaybackSession,
    element: Option<Arc<dyn MediaElement>>,
    mounted: bool,
}

/// Handle to the progress service for sending commands
#[derive(Clone)]
pub struct ProgressHandle {
    command_tx: tokio_mpsc::UnboundedSender<ProgressCommand>,
    updates: ProgressUpdates,
    cache: ProgressCache,
}

impl ProgressHandle {
    /// Start tracking a player; `element` receives resume seeks
    pub fn mount(&self, video_id: VideoId, element: Option<Arc<dyn MediaElement>>) {
        let _ = self
            .command_tx
            .send(ProgressCommand::Mount { video_id, element });
    }

    pub fn media_event(&self, video_id: VideoId, event: MediaEvent) {
        let _ = self
            .command_tx
            .send(ProgressCommand::Media { video_id, event });
    }

    /// Media metadata became available; may trigger a resume seek
    pub fn loaded_metadata(&self, video_id: VideoId, duration: Option<f64>, current_position: f64) {
        let _ = self.command_tx.send(ProgressCommand::LoadedMetadata {
            video_id,
            duration,
            current_position,
        });
    }

    pub fn flush(&self, video_id: VideoId) {
        let _ = self.command_tx.send(ProgressCommand::Flush(video_id));
    }

    /// Stop tracking a player after one last flush
    pub fn unmount(&self, video_id: VideoId) {
        let _ = self.command_tx.send(ProgressCommand::Unmount(video_id));
    }

    /// Flush every tracked video and wait until no flush is in flight
    pub async fn flush_all(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .command_tx
            .send(ProgressCommand::FlushAll(Some(tx)))
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Flush every tracked video without waiting
    pub fn request_flush_all(&self) {
        let _ = self.command_tx.send(ProgressCommand::FlushAll(None));
    }

    /// Session state after all previously sent commands were applied
    pub async fn snapshot(&self, video_id: VideoId) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ProgressCommand::Snapshot { video_id, reply })
            .ok()?;
        rx.await.ok().flatten()
    }

    pub fn subscribe_updates(&self) -> tokio_mpsc::UnboundedReceiver<ProgressUpdate> {
        self.updates.subscribe_all()
    }

    pub fn subscribe_video(&self, video_id: VideoId) -> tokio_mpsc::UnboundedReceiver<ProgressUpdate> {
        self.updates.subscribe_video(video_id)
    }

    /// Read-only view of the authoritative progress
    pub fn cache(&self) -> &ProgressCache {
        &self.cache
    }

    pub fn percent_watched(&self, video_id: VideoId) -> Option<f64> {
        self.cache.percent_watched(video_id)
    }

    pub fn last_watched_position(&self, video_id: VideoId) -> Option<f64> {
        self.cache.last_watched_position(video_id)
    }
}

/// Progress service that owns every playback session of one view
pub struct ProgressService {
    store: Arc<dyn ProgressStore>,
    config: TrackerConfig,
    command_rx: tokio_mpsc::UnboundedReceiver<ProgressCommand>,
    finished_tx: tokio_mpsc::UnboundedSender<FlushFinished>,
    finished_rx: tokio_mpsc::UnboundedReceiver<FlushFinished>,
    videos: HashMap<VideoId, TrackedVideo>,
    synchronizer: ProgressSynchronizer,
    updates: ProgressUpdates,
    idle_waiters: Vec<oneshot::Sender<()>>,
    state: ServiceState,
}

impl ProgressService {
    pub fn start(
        store: Arc<dyn ProgressStore>,
        config: TrackerConfig,
        runtime_handle: tokio::runtime::Handle,
    ) -> ProgressHandle {
        let (command_tx, command_rx) = tokio_mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = tokio_mpsc::unbounded_channel();

        let cache = ProgressCache::new();
        let updates = ProgressUpdates::new();

        let handle = ProgressHandle {
            command_tx,
            updates: updates.clone(),
            cache: cache.clone(),
        };

        let service = ProgressService {
            store,
            config,
            command_rx,
            finished_tx,
            finished_rx,
            videos: HashMap::new(),
            synchronizer: ProgressSynchronizer::new(cache),
            updates,
            idle_waiters: Vec::new(),
            state: ServiceState::Ready,
        };

        runtime_handle.spawn(service.run());

        handle
    }

    async fn run(mut self) {
        self.load().await;

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(finished) = self.finished_rx.recv() => self.handle_finished(finished),
            }
        }

        // Every handle is gone; let in-flight flushes land so credited time is kept
        while self.synchronizer.has_in_flight() {
            match self.finished_rx.recv().await {
                Some(finished) => self.handle_finished(finished),
                None => break,
            }
        }

        info!("ProgressService stopped");
    }

    async fn load(&mut self) {
        match self.store.fetch_progress().await {
            Ok(records) => {
                let videos = records.len();
                self.synchronizer.seed(records);
                info!("ProgressService started with progress for {} video(s)", videos);
                self.updates.publish(ProgressUpdate::Loaded { videos });
            }
            Err(e) => {
                error!("Failed to load progress, tracking disabled: {}", e);
                self.state = ServiceState::Inert;
                self.updates.publish(ProgressUpdate::LoadFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    fn handle_command(&mut self, command: ProgressCommand) {
        if let ProgressCommand::Snapshot { video_id, reply } = command {
            let _ = reply.send(self.snapshot(video_id));
            return;
        }

        if self.state == ServiceState::Inert {
            if let ProgressCommand::FlushAll(Some(done)) = command {
                let _ = done.send(());
            }
            return;
        }

        match command {
            ProgressCommand::Mount { video_id, element } => self.mount(video_id, element),
            ProgressCommand::Media { video_id, event } => self.media_event(video_id, event),
            ProgressCommand::LoadedMetadata {
                video_id,
                duration,
                current_position,
            } => self.loaded_metadata(video_id, duration, current_position),
            ProgressCommand::Flush(video_id) => self.flush(video_id, FlushReason::Manual),
            ProgressCommand::Unmount(video_id) => self.unmount(video_id),
            ProgressCommand::FlushAll(done) => self.flush_all(done),
            ProgressCommand::Snapshot { .. } => {}
        }
    }

    fn mount(&mut self, video_id: VideoId, element: Option<Arc<dyn MediaElement>>) {
        let flush_interval = self.config.flush_interval;
        let tracked = self.videos.entry(video_id).or_insert_with(|| TrackedVideo {
            session: PlaybackSession::new(video_id, flush_interval),
            element: None,
            mounted: true,
        });
        tracked.element = element;
        tracked.mounted = true;
        debug!("Video {}: player mounted", video_id);
    }

    fn media_event(&mut self, video_id: VideoId, event: MediaEvent) {
        let Some(tracked) = self.videos.get_mut(&video_id) else {
            debug!("Video {}: ignoring {:?} for unmounted player", video_id, event);
            return;
        };
        if !tracked.mounted {
            debug!("Video {}: ignoring {:?} after unmount", video_id, event);
            return;
        }

        if let Some(reason) = tracked.session.handle_event(&event) {
            self.flush(video_id, reason);
        }
    }

    fn loaded_metadata(&mut self, video_id: VideoId, duration: Option<f64>, current_position: f64) {
        let record = self.synchronizer.cache().get(video_id);
        let Some(tracked) = self.videos.get_mut(&video_id) else {
            return;
        };
        if !tracked.mounted {
            return;
        }

        let target = apply_resume(
            tracked.element.as_deref(),
            &mut tracked.session,
            record.as_ref(),
            duration,
            current_position,
        );

        if let Some(position) = target {
            info!("Video {}: resuming at {:.1}s", video_id, position);
            self.updates
                .publish(ProgressUpdate::Resumed { video_id, position });
        }
    }

    fn unmount(&mut self, video_id: VideoId) {
        let Some(tracked) = self.videos.get_mut(&video_id) else {
            return;
        };
        tracked.session.stop_at_last_known();
        tracked.mounted = false;
        tracked.element = None;
        debug!("Video {}: player unmounted", video_id);

        self.flush(video_id, FlushReason::Unmount);
        self.reap(video_id);
    }

    fn flush_all(&mut self, done: Option<oneshot::Sender<()>>) {
        let ids: Vec<VideoId> = self.videos.keys().copied().collect();
        info!("Flushing {} tracked video(s)", ids.len());

        for video_id in ids {
            if let Some(tracked) = self.videos.get_mut(&video_id) {
                tracked.session.checkpoint();
            }
            self.flush(video_id, FlushReason::Shutdown);
        }

        if let Some(done) = done {
            self.idle_waiters.push(done);
        }
        self.notify_if_idle();
    }

    fn flush(&mut self, video_id: VideoId, reason: FlushReason) {
        let Some(tracked) = self.videos.get_mut(&video_id) else {
            return;
        };

        match self.synchronizer.plan(&mut tracked.session) {
            FlushPlan::Idle => {}
            FlushPlan::AlreadyCredited => {
                self.updates
                    .publish(ProgressUpdate::AlreadyCredited { video_id });
            }
            FlushPlan::Deferred => {
                debug!("Video {}: {:?} flush waits for the one in flight", video_id, reason);
            }
            FlushPlan::Submit(job) => {
                debug!(
                    "Video {}: {:?} flush of {} interval(s)",
                    video_id,
                    reason,
                    job.request.intervals.len()
                );

                let store = self.store.clone();
                let config = self.config.clone();
                let finished_tx = self.finished_tx.clone();

                tokio::spawn(async move {
                    let result = submit_with_retry(store.as_ref(), &job.request, &config).await;
                    let _ = finished_tx.send(FlushFinished {
                        video_id,
                        batch: job.batch,
                        result,
                    });
                });
            }
        }
    }

    fn handle_finished(&mut self, finished: FlushFinished) {
        let FlushFinished {
            video_id,
            batch,
            result,
        } = finished;

        let session = self.videos.get_mut(&video_id).map(|t| &mut t.session);
        let completion = self.synchronizer.complete(video_id, batch, result, session);

        match completion.outcome {
            FlushOutcome::Credited(record) => {
                info!(
                    "Video {}: progress saved, {:.1}% watched",
                    video_id, record.percent_watched
                );
                self.updates
                    .publish(ProgressUpdate::Flushed { video_id, record });
            }
            FlushOutcome::RewatchNotCounted(e) => {
                info!("Video {}: rewatch not counted: {}", video_id, e);
                self.updates.publish(ProgressUpdate::RewatchNotCounted {
                    video_id,
                    message: e.user_message(),
                });
            }
            FlushOutcome::Failed(e) => {
                warn!("Video {}: failed to save progress: {}", video_id, e);
                if matches!(e, ProgressError::Unauthorized) {
                    self.updates
                        .publish(ProgressUpdate::Unauthorized { video_id });
                }
                self.updates.publish(ProgressUpdate::FlushFailed {
                    video_id,
                    message: e.user_message(),
                    error: e.to_string(),
                });
            }
        }

        if completion.rerun {
            self.flush(video_id, FlushReason::Manual);
        }

        self.reap(video_id);
        self.notify_if_idle();
    }

    /// Drop an unmounted session once it has nothing left to send
    fn reap(&mut self, video_id: VideoId) {
        let done = self.videos.get(&video_id).is_some_and(|t| {
            !t.mounted && !t.session.has_pending() && !self.synchronizer.is_in_flight(video_id)
        });
        if done {
            self.videos.remove(&video_id);
            debug!("Video {}: session released", video_id);
        }
    }

    fn notify_if_idle(&mut self) {
        if self.synchronizer.has_in_flight() {
            return;
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn snapshot(&self, video_id: VideoId) -> Option<SessionSnapshot> {
        self.videos.get(&video_id).map(|t| SessionSnapshot {
            video_id,
            is_playing: t.session.is_playing(),
            segment_start: t.session.segment_start(),
            pending: t.session.pending().to_vec(),
            last_known_position: t.session.last_known_position(),
            mounted: t.mounted,
            flush_in_flight: self.synchronizer.is_in_flight(video_id),
        })
    }
}
