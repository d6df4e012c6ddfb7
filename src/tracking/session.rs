use crate::intervals::Interval;
use crate::store::VideoId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Events forwarded from a media element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaEvent {
    Play {
        position: f64,
    },
    TimeUpdate {
        position: f64,
    },
    Pause {
        position: f64,
    },
    Ended {
        position: f64,
    },
    /// `from` defaults to the position of the last time update
    Seeking {
        #[serde(default)]
        from: Option<f64>,
        to: f64,
    },
}

impl MediaEvent {
    fn has_finite_positions(&self) -> bool {
        match *self {
            MediaEvent::Play { position }
            | MediaEvent::TimeUpdate { position }
            | MediaEvent::Pause { position }
            | MediaEvent::Ended { position } => position.is_finite(),
            MediaEvent::Seeking { from, to } => to.is_finite() && from.map_or(true, f64::is_finite),
        }
    }
}

/// Why a session asked for a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Periodic,
    Pause,
    Ended,
    Seek,
    Unmount,
    Shutdown,
    Manual,
}

/// Client-side playback state of one mounted video
///
/// Pure state machine: events go in, flush requests come out. Nothing here
/// talks to the network.
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    video_id: VideoId,
    is_playing: bool,
    segment_start: Option<f64>,
    pending: Vec<Interval>,
    last_sample_time: f64,
    last_known_position: f64,
    duration: Option<f64>,
    flush_interval: f64,
}

impl PlaybackSession {
    pub fn new(video_id: VideoId, flush_interval: Duration) -> Self {
        Self {
            video_id,
            is_playing: false,
            segment_start: None,
            pending: Vec::new(),
            last_sample_time: 0.0,
            last_known_position: 0.0,
            duration: None,
            flush_interval: flush_interval.as_secs_f64(),
        }
    }

    pub fn video_id(&self) -> VideoId {
        self.video_id
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn segment_start(&self) -> Option<f64> {
        self.segment_start
    }

    pub fn last_known_position(&self) -> f64 {
        self.last_known_position
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Option<f64>) {
        self.duration = duration.filter(|d| d.is_finite() && *d > 0.0);
    }

    pub fn pending(&self) -> &[Interval] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Apply one media event; returns a flush request when the event calls for one
    pub fn handle_event(&mut self, event: &MediaEvent) -> Option<FlushReason> {
        if !event.has_finite_positions() {
            warn!("Video {}: ignoring {:?} with a non-finite position", self.video_id, event);
            return None;
        }

        match *event {
            MediaEvent::Play { position } => {
                self.last_known_position = position;
                if !self.is_playing {
                    self.is_playing = true;
                    self.segment_start = Some(position);
                    self.last_sample_time = position;
                }
                None
            }
            MediaEvent::TimeUpdate { position } => {
                self.last_known_position = position;
                if !self.is_playing || position - self.last_sample_time < self.flush_interval {
                    return None;
                }
                self.close_segment(position);
                self.segment_start = Some(position);
                self.last_sample_time = position;
                Some(FlushReason::Periodic)
            }
            MediaEvent::Pause { position } => {
                self.stop_at(position);
                Some(FlushReason::Pause)
            }
            MediaEvent::Ended { position } => {
                self.stop_at(position);
                Some(FlushReason::Ended)
            }
            MediaEvent::Seeking { from, to } => {
                let from = from.unwrap_or(self.last_known_position);
                if self.is_playing {
                    self.close_segment(from);
                    self.segment_start = Some(to);
                    self.last_sample_time = to;
                }
                self.last_known_position = to;
                Some(FlushReason::Seek)
            }
        }
    }

    /// Close the open segment at the last known position and keep playing from there
    ///
    /// Used before shutdown flushes, where no pause event is guaranteed.
    pub fn checkpoint(&mut self) {
        if self.is_playing {
            let position = self.last_known_position;
            self.close_segment(position);
            self.segment_start = Some(position);
            self.last_sample_time = position;
        }
    }

    /// Close the open segment at the last known position and stop tracking playback
    pub fn stop_at_last_known(&mut self) {
        let position = self.last_known_position;
        self.stop_at(position);
    }

    /// Record a resumed position as the starting point of the session
    pub fn set_baseline(&mut self, position: f64) {
        self.last_known_position = position;
        self.last_sample_time = position;
        if self.is_playing {
            self.segment_start = Some(position);
        }
    }

    /// Hand the pending intervals to a flush
    pub fn take_pending(&mut self) -> Vec<Interval> {
        std::mem::take(&mut self.pending)
    }

    /// Put back intervals of a failed flush, ahead of anything recorded since
    pub fn restore_pending(&mut self, mut batch: Vec<Interval>) {
        batch.append(&mut self.pending);
        self.pending = batch;
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    fn stop_at(&mut self, position: f64) {
        if self.is_playing {
            self.close_segment(position);
        }
        self.is_playing = false;
        self.segment_start = None;
        self.last_known_position = position;
    }

    fn close_segment(&mut self, end: f64) {
        if let Some(start) = self.segment_start {
            if let Some(interval) = Interval::new(start, end) {
                self.pending.push(interval);
            }
        }
    }
}
