use crate::config::Config;
use crate::intervals::{merge, Interval, IntervalSet};
use crate::store::models::{ProgressRecord, VideoId, VideoSummary};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Error as ReqwestError, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const OVERLAP_MESSAGE: &str = "Rewatched segments are not counted toward your progress";
pub const SAVE_FAILED_MESSAGE: &str = "Failed to save progress";

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] ReqwestError),
    #[error("Not authenticated")]
    Unauthorized,
    #[error("Interval overlaps already credited progress: {0}")]
    Overlap(String),
    #[error("Progress store returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Progress store unavailable: {0}")]
    Unavailable(String),
}

impl ProgressError {
    pub fn is_overlap(&self) -> bool {
        matches!(self, ProgressError::Overlap(_))
    }

    /// Whether repeating the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProgressError::Request(e) => !e.is_decode() && !e.is_builder(),
            ProgressError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ProgressError::Unavailable(_) => true,
            ProgressError::Unauthorized
            | ProgressError::Overlap(_)
            | ProgressError::Serialization(_) => false,
        }
    }

    /// Message suitable for showing to the viewer
    pub fn user_message(&self) -> &'static str {
        if self.is_overlap() {
            OVERLAP_MESSAGE
        } else {
            SAVE_FAILED_MESSAGE
        }
    }
}

/// Interval as it travels over the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalPayload {
    pub start_time: f64,
    pub end_time: f64,
}

impl From<&Interval> for IntervalPayload {
    fn from(interval: &Interval) -> Self {
        IntervalPayload {
            start_time: interval.start,
            end_time: interval.end,
        }
    }
}

/// Body of `POST /progress/update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdateRequest {
    pub video_id: VideoId,
    pub current_time: f64,
    pub intervals: Vec<IntervalPayload>,
}

impl ProgressUpdateRequest {
    pub fn new(video_id: VideoId, current_time: f64, contribution: &IntervalSet) -> Self {
        ProgressUpdateRequest {
            video_id,
            current_time,
            intervals: contribution.iter().map(IntervalPayload::from).collect(),
        }
    }

    /// Submitted intervals as a normalized set
    pub fn interval_set(&self) -> IntervalSet {
        to_interval_set(&self.intervals)
    }
}

/// Per-video entry returned by both progress endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub video: VideoSummary,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub last_watched_position: f64,
    #[serde(default)]
    pub intervals: Vec<IntervalPayload>,
}

impl From<ProgressEntry> for ProgressRecord {
    fn from(entry: ProgressEntry) -> Self {
        ProgressRecord {
            confirmed_intervals: to_interval_set(&entry.intervals),
            percent_watched: entry.progress.clamp(0.0, 100.0),
            last_watched_position: entry.last_watched_position,
            video: entry.video,
        }
    }
}

impl From<&ProgressRecord> for ProgressEntry {
    fn from(record: &ProgressRecord) -> Self {
        ProgressEntry {
            video: record.video.clone(),
            progress: record.percent_watched,
            last_watched_position: record.last_watched_position,
            intervals: record
                .confirmed_intervals
                .iter()
                .map(IntervalPayload::from)
                .collect(),
        }
    }
}

fn to_interval_set(payloads: &[IntervalPayload]) -> IntervalSet {
    merge(
        payloads
            .iter()
            .filter_map(|p| Interval::new(p.start_time, p.end_time)),
    )
}

/// Remote store of per-user watch progress (allows mocking for tests)
#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync {
    /// All progress records of the authenticated user
    async fn fetch_progress(&self) -> Result<Vec<ProgressRecord>, ProgressError>;

    /// Submit a contribution and get back the new authoritative record
    async fn update_progress(
        &self,
        request: &ProgressUpdateRequest,
    ) -> Result<ProgressRecord, ProgressError>;
}

/// Progress store reached over the REST API
#[derive(Clone)]
pub struct HttpProgressStore {
    client: Client,
    base_url: String,
    authorization: Option<String>,
}

impl HttpProgressStore {
    pub fn new(config: &Config) -> Result<Self, ProgressError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            authorization: config.authorization(),
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.authorization {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl ProgressStore for HttpProgressStore {
    async fn fetch_progress(&self) -> Result<Vec<ProgressRecord>, ProgressError> {
        let url = format!("{}/progress", self.base_url);
        debug!("Fetching progress from {}", url);

        let response = self.with_auth(self.client.get(&url)).send().await?;

        if response.status().is_success() {
            let entries: Vec<ProgressEntry> = response.json().await?;
            Ok(entries.into_iter().map(ProgressRecord::from).collect())
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn update_progress(
        &self,
        request: &ProgressUpdateRequest,
    ) -> Result<ProgressRecord, ProgressError> {
        let url = format!("{}/progress/update", self.base_url);
        debug!(
            "Submitting {} interval(s) for video {}",
            request.intervals.len(),
            request.video_id
        );

        let response = self
            .with_auth(self.client.post(&url))
            .json(request)
            .send()
            .await?;

        if response.status().is_success() {
            let entry: ProgressEntry = response.json().await?;
            Ok(entry.into())
        } else {
            Err(error_from_response(response).await)
        }
    }
}

async fn error_from_response(response: Response) -> ProgressError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == StatusCode::UNAUTHORIZED {
        warn!("Progress store rejected credentials");
        return ProgressError::Unauthorized;
    }

    classify_error_body(status.as_u16(), &body)
}

/// Map a non-2xx body to an error kind; any mention of "overlap" wins
pub(crate) fn classify_error_body(status: u16, body: &str) -> ProgressError {
    let message = error_message(body);

    if body.to_lowercase().contains("overlap") {
        ProgressError::Overlap(message)
    } else {
        ProgressError::Status { status, message }
    }
}

/// Pull `error` or `detail` out of a JSON error body, else use the raw text
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "detail", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_creation_trims_base_url() {
        let config = Config {
            api_url: "http://localhost:8000/api/".to_string(),
            auth_token: Some("abc".to_string()),
            ..Config::default()
        };
        let store = HttpProgressStore::new(&config).unwrap();
        assert_eq!(store.base_url, "http://localhost:8000/api");
        assert_eq!(store.authorization.as_deref(), Some("Bearer abc"));
    }

    #[test]
    fn test_overlap_body_is_classified() {
        let err = classify_error_body(400, r#"{"error": "Interval overlaps existing progress"}"#);
        assert!(err.is_overlap());
        assert!(!err.is_transient());
        assert_eq!(err.user_message(), OVERLAP_MESSAGE);
    }

    #[test]
    fn test_other_bodies_are_generic_failures() {
        let err = classify_error_body(400, r#"{"detail": "video_id is required"}"#);
        match &err {
            ProgressError::Status { status, message } => {
                assert_eq!(*status, 400);
                assert_eq!(message, "video_id is required");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.is_transient());
        assert_eq!(err.user_message(), SAVE_FAILED_MESSAGE);

        let server = classify_error_body(503, "upstream down");
        assert!(server.is_transient());
        assert_eq!(server.to_string(), "Progress store returned 503: upstream down");
    }

    #[test]
    fn test_entry_conversion_normalizes_intervals() {
        let entry: ProgressEntry = serde_json::from_str(
            r#"{
                "video": {"id": 3, "duration": 40.0, "title": "Lesson 1"},
                "progress": 37.5,
                "last_watched_position": 15.0,
                "intervals": [
                    {"start_time": 5.0, "end_time": 15.0},
                    {"start_time": 0.0, "end_time": 6.0},
                    {"start_time": 9.0, "end_time": 9.0}
                ]
            }"#,
        )
        .unwrap();

        let record = ProgressRecord::from(entry);
        assert_eq!(record.video.id, VideoId(3));
        assert_eq!(record.percent_watched, 37.5);
        assert_eq!(record.confirmed_intervals.as_slice(), &[Interval { start: 0.0, end: 15.0 }]);
    }

    #[test]
    fn test_inverted_wire_intervals_are_dropped() {
        let request: ProgressUpdateRequest = serde_json::from_str(
            r#"{
                "video_id": 3,
                "current_time": 30.0,
                "intervals": [
                    {"start_time": 20.0, "end_time": 5.0},
                    {"start_time": 0.0, "end_time": 30.0}
                ]
            }"#,
        )
        .unwrap();

        let set = request.interval_set();
        assert_eq!(set.as_slice(), &[Interval { start: 0.0, end: 30.0 }]);
        assert_eq!(set.total_duration(), 30.0);
    }

    #[test]
    fn test_update_request_wire_shape() {
        let contribution = merge(Interval::new(10.0, 15.0));
        let request = ProgressUpdateRequest::new(VideoId(9), 15.0, &contribution);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "video_id": 9,
                "current_time": 15.0,
                "intervals": [{"start_time": 10.0, "end_time": 15.0}]
            })
        );
        assert_eq!(request.interval_set(), contribution);
    }
}
