use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use watchtrack::intervals::format_duration;
use watchtrack::store::{HttpProgressStore, VideoId};
use watchtrack::tracking::{MediaElement, MediaEvent, ProgressService, ProgressUpdate, TrackingScope};
use watchtrack::Config;

/// One line of a recorded player session
#[derive(Debug, Deserialize)]
struct ScriptEntry {
    video_id: VideoId,
    event: ScriptEvent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEvent {
    Player(PlayerEvent),
    Media(MediaEvent),
}

/// Player lifecycle, as opposed to playback events
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PlayerEvent {
    Mount,
    LoadedMetadata {
        #[serde(default)]
        duration: Option<f64>,
        #[serde(default)]
        position: f64,
    },
    Unmount,
}

/// Stand-in element that only logs seeks
struct LoggingElement {
    video_id: VideoId,
}

impl MediaElement for LoggingElement {
    fn seek(&self, position: f64) {
        info!("Video {}: seek to {}", self.video_id, format_duration(position));
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("watchtrack=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let script_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("usage: watchtrack <events.json>");
            std::process::exit(2);
        }
    };

    let config = Config::load()?;
    info!("Using progress API at {}", config.api_url);

    let raw = tokio::fs::read_to_string(&script_path).await?;
    let script: Vec<ScriptEntry> = serde_json::from_str(&raw)?;
    info!("Replaying {} event(s) from {}", script.len(), script_path.display());

    let store = Arc::new(HttpProgressStore::new(&config)?);
    let handle = ProgressService::start(store, config.tracker.clone(), tokio::runtime::Handle::current());
    let mut updates = handle.subscribe_updates();

    let reporter = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                ProgressUpdate::Flushed { video_id, record } => info!(
                    "Video {}: {:.1}% watched, last position {}",
                    video_id,
                    record.percent_watched,
                    format_duration(record.last_watched_position)
                ),
                ProgressUpdate::LoadFailed { message } => {
                    error!("Failed to load progress: {}", message)
                }
                ProgressUpdate::FlushFailed { video_id, message, error } => {
                    error!("Video {}: {} ({})", video_id, message, error)
                }
                ProgressUpdate::RewatchNotCounted { video_id, message } => {
                    info!("Video {}: {}", video_id, message)
                }
                other => info!("{:?}", other),
            }
        }
    });

    let scope = TrackingScope::new(handle.clone());
    for entry in script {
        let video_id = entry.video_id;
        match entry.event {
            ScriptEvent::Player(PlayerEvent::Mount) => {
                handle.mount(video_id, Some(Arc::new(LoggingElement { video_id })));
            }
            ScriptEvent::Player(PlayerEvent::LoadedMetadata { duration, position }) => {
                handle.loaded_metadata(video_id, duration, position);
            }
            ScriptEvent::Player(PlayerEvent::Unmount) => handle.unmount(video_id),
            ScriptEvent::Media(event) => handle.media_event(video_id, event),
        }
    }
    scope.close().await;

    for video_id in handle.cache().video_ids() {
        if let Some(record) = handle.cache().get(video_id) {
            info!(
                "Video {} \"{}\": {:.1}% of {}",
                video_id,
                record.video.title,
                record.percent_watched,
                format_duration(record.video.duration.unwrap_or(0.0))
            );
        }
    }

    drop(handle);
    let _ = reporter.await;

    Ok(())
}
