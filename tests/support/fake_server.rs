use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use watchtrack::intervals::{merge, Interval};
use watchtrack::store::{IntervalPayload, ProgressEntry, ProgressUpdateRequest, VideoSummary};
use watchtrack::VideoId;

#[derive(Default)]
pub struct FakeStoreState {
    pub entries: BTreeMap<VideoId, ProgressEntry>,
    pub updates: Vec<ProgressUpdateRequest>,
    pub seen_auth: Vec<Option<String>>,
    /// Canned error returned by every endpoint while set
    pub reject: Option<(StatusCode, String)>,
}

/// Progress API double served over real HTTP
#[derive(Clone, Default)]
pub struct FakeStore {
    pub state: Arc<Mutex<FakeStoreState>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_video(&self, id: u64, duration: f64, confirmed: &[(f64, f64)], last: f64) {
        let entry = ProgressEntry {
            video: VideoSummary {
                id: VideoId(id),
                duration: Some(duration),
                title: format!("Lesson {}", id),
                description: "Recorded lecture".to_string(),
                uploaded_by: Some("instructor".to_string()),
                created_at: None,
            },
            progress: 0.0,
            last_watched_position: last,
            intervals: confirmed
                .iter()
                .map(|&(start_time, end_time)| IntervalPayload {
                    start_time,
                    end_time,
                })
                .collect(),
        };
        let mut state = self.state.lock().unwrap();
        state.entries.insert(VideoId(id), entry);
        recompute_percent(state.entries.get_mut(&VideoId(id)).unwrap());
    }

    pub fn reject_with(&self, status: StatusCode, body: &str) {
        self.state.lock().unwrap().reject = Some((status, body.to_string()));
    }

    pub fn updates(&self) -> Vec<ProgressUpdateRequest> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn seen_auth(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().seen_auth.clone()
    }

    pub fn entry(&self, id: u64) -> Option<ProgressEntry> {
        self.state.lock().unwrap().entries.get(&VideoId(id)).cloned()
    }

    /// Serve on an ephemeral port; returns the API base URL
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/api/progress", get(list_progress))
            .route("/api/progress/update", post(update_progress))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}/api", addr)
    }
}

fn recompute_percent(entry: &mut ProgressEntry) {
    let covered = merge(
        entry
            .intervals
            .iter()
            .filter_map(|p| Interval::new(p.start_time, p.end_time)),
    );
    entry.intervals = covered.iter().map(IntervalPayload::from).collect();
    entry.progress = match entry.video.duration {
        Some(d) if d > 0.0 => (covered.total_duration() * 100.0 / d).min(100.0),
        _ => 0.0,
    };
}

fn record_auth(state: &mut FakeStoreState, headers: &HeaderMap) {
    state.seen_auth.push(
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    );
}

async fn list_progress(State(store): State<FakeStore>, headers: HeaderMap) -> Response {
    let mut state = store.state.lock().unwrap();
    record_auth(&mut state, &headers);

    if let Some((status, body)) = state.reject.clone() {
        return (status, body).into_response();
    }

    let entries: Vec<ProgressEntry> = state.entries.values().cloned().collect();
    Json(entries).into_response()
}

async fn update_progress(
    State(store): State<FakeStore>,
    headers: HeaderMap,
    Json(request): Json<ProgressUpdateRequest>,
) -> Response {
    let mut state = store.state.lock().unwrap();
    record_auth(&mut state, &headers);
    state.updates.push(request.clone());

    if let Some((status, body)) = state.reject.clone() {
        return (status, body).into_response();
    }

    let Some(entry) = state.entries.get_mut(&request.video_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Video not found"})),
        )
            .into_response();
    };

    entry.intervals.extend(request.intervals.iter().copied());
    entry.last_watched_position = match entry.video.duration {
        Some(d) => request.current_time.clamp(0.0, d),
        None => request.current_time,
    };
    recompute_percent(entry);

    Json(entry.clone()).into_response()
}
