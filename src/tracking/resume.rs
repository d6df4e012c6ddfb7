use crate::store::ProgressRecord;
use crate::tracking::session::PlaybackSession;

/// Positions closer than this to zero count as "not moved yet"
const DEFAULT_START_TOLERANCE: f64 = 0.1;

/// Seek control over the element playing a video
pub trait MediaElement: Send + Sync {
    fn seek(&self, position: f64);
}

/// Where playback should resume, if anywhere.
///
/// Resumes only when the duration is known, the stored position lies strictly
/// inside `(0, duration)` and the element has not moved off its start.
pub fn resume_target(
    record: Option<&ProgressRecord>,
    duration: Option<f64>,
    current_position: f64,
) -> Option<f64> {
    let record = record?;
    let duration = duration
        .or(record.video.duration)
        .filter(|d| d.is_finite() && *d > 0.0)?;

    if current_position.abs() > DEFAULT_START_TOLERANCE {
        return None;
    }

    let last = record.last_watched_position;
    if !last.is_finite() || last <= 0.0 || last >= duration {
        return None;
    }

    Some(last.clamp(0.0, duration))
}

/// Seek the element to the resume target and make it the session baseline
pub fn apply_resume(
    element: Option<&dyn MediaElement>,
    session: &mut PlaybackSession,
    record: Option<&ProgressRecord>,
    duration: Option<f64>,
    current_position: f64,
) -> Option<f64> {
    session.set_duration(duration.or_else(|| record.and_then(|r| r.video.known_duration())));
    let target = resume_target(record, duration, current_position)?;

    if let Some(element) = element {
        element.seek(target);
    }
    session.set_baseline(target);
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervals::IntervalSet;
    use crate::store::{VideoId, VideoSummary};
    use crate::test_support::RecordingElement;
    use std::time::Duration;

    fn record(last: f64, duration: Option<f64>) -> ProgressRecord {
        ProgressRecord {
            video: VideoSummary {
                id: VideoId(4),
                duration,
                title: String::new(),
                description: String::new(),
                uploaded_by: None,
                created_at: None,
            },
            percent_watched: 0.0,
            last_watched_position: last,
            confirmed_intervals: IntervalSet::new(),
        }
    }

    #[test]
    fn test_resumes_inside_duration() {
        assert_eq!(resume_target(Some(&record(20.0, None)), Some(40.0), 0.0), Some(20.0));
    }

    #[test]
    fn test_never_resumes_past_duration() {
        assert_eq!(resume_target(Some(&record(50.0, None)), Some(40.0), 0.0), None);
        assert_eq!(resume_target(Some(&record(40.0, None)), Some(40.0), 0.0), None);
    }

    #[test]
    fn test_skips_zero_and_negative_positions() {
        assert_eq!(resume_target(Some(&record(0.0, None)), Some(40.0), 0.0), None);
        assert_eq!(resume_target(Some(&record(-5.0, None)), Some(40.0), 0.0), None);
        assert_eq!(resume_target(Some(&record(f64::NAN, None)), Some(40.0), 0.0), None);
    }

    #[test]
    fn test_skips_when_element_already_moved() {
        assert_eq!(resume_target(Some(&record(20.0, None)), Some(40.0), 12.0), None);
    }

    #[test]
    fn test_unknown_duration_skips_resume() {
        assert_eq!(resume_target(Some(&record(20.0, None)), None, 0.0), None);
        assert_eq!(resume_target(Some(&record(20.0, None)), Some(f64::INFINITY), 0.0), None);
        assert_eq!(resume_target(None, Some(40.0), 0.0), None);
    }

    #[test]
    fn test_falls_back_to_store_duration() {
        assert_eq!(resume_target(Some(&record(20.0, Some(40.0))), None, 0.0), Some(20.0));
    }

    #[test]
    fn test_apply_resume_seeks_and_sets_baseline() {
        let element = RecordingElement::new();
        let mut session = PlaybackSession::new(VideoId(4), Duration::from_secs(15));

        let target = apply_resume(
            Some(&element),
            &mut session,
            Some(&record(20.0, None)),
            Some(40.0),
            0.0,
        );

        assert_eq!(target, Some(20.0));
        assert_eq!(element.seeks(), vec![20.0]);
        assert_eq!(session.last_known_position(), 20.0);
        assert_eq!(session.duration(), Some(40.0));
    }

    #[test]
    fn test_apply_resume_rejected_leaves_element_alone() {
        let element = RecordingElement::new();
        let mut session = PlaybackSession::new(VideoId(4), Duration::from_secs(15));

        let target = apply_resume(
            Some(&element),
            &mut session,
            Some(&record(50.0, None)),
            Some(40.0),
            0.0,
        );

        assert_eq!(target, None);
        assert!(element.seeks().is_empty());
        assert_eq!(session.last_known_position(), 0.0);
    }
}
