pub mod client;
pub mod models;

pub use client::{
    HttpProgressStore, IntervalPayload, ProgressEntry, ProgressError, ProgressStore,
    ProgressUpdateRequest,
};
pub use models::{ProgressRecord, VideoId, VideoSummary};
