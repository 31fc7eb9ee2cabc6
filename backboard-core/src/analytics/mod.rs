//! Derived analytics over student timelines
//!
//! Every function in this module tree is a read-only fold over normalized
//! timelines: no hidden state, recomputable at any time, safe to run
//! concurrently. Submodules:
//!
//! - [`concepts`] — per-concept struggle aggregation for one lecture
//! - [`clusters`] — per-student feature extraction and cohort assignment
//! - [`rollup`] — per-cluster course-level rollups for instructors

pub mod clusters;
pub mod concepts;
pub mod rollup;

pub use clusters::{assign_cluster, ClusterAssignment, StudentFeatures};
pub use concepts::aggregate;
pub use rollup::rollup;

use crate::types::{AnalyticsEvent, EventKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and a running
/// aggregation.
///
/// Aggregations check the token between per-student folds; once cancelled
/// they return [`crate::Error::Cancelled`] and discard the accumulator.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// A contiguous stretch of playback, in video seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WatchSegment {
    pub start: f64,
    pub end: f64,
}

impl WatchSegment {
    /// Seconds of this segment falling inside `[start, end)`.
    pub fn overlap(&self, start: f64, end: f64) -> f64 {
        (self.end.min(end) - self.start.max(start)).max(0.0)
    }
}

/// Estimate watched stretches from a timestamp-ordered event sequence.
///
/// A play event opens a segment at its position; the next pause, seek,
/// drop-off, or concept-jump closes it at its own position. Closures
/// behind the opening position (a backward seek) are discarded rather
/// than counted negative. Speed changes and notes do not interrupt
/// playback. A play with no closing event contributes nothing.
pub(crate) fn watch_segments(events: &[AnalyticsEvent]) -> Vec<WatchSegment> {
    let mut segments = Vec::new();
    let mut open: Option<f64> = None;

    for event in events {
        match event.kind {
            EventKind::Play => {
                // A repeated play re-anchors the segment
                open = event.position.or(open);
            }
            EventKind::Pause | EventKind::Seek | EventKind::DropOff | EventKind::ConceptJump => {
                if let (Some(start), Some(end)) = (open.take(), event.position) {
                    if end > start {
                        segments.push(WatchSegment { start, end });
                    }
                }
            }
            EventKind::SpeedChange | EventKind::Note | EventKind::Rewind => {}
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(kind: EventKind, position: Option<f64>, secs: i64) -> AnalyticsEvent {
        AnalyticsEvent {
            id: format!("evt-{}", secs),
            student_id: "s1".to_string(),
            course_id: "course1".to_string(),
            lecture_id: "lec1".to_string(),
            concept_id: None,
            kind,
            position,
            playback_speed: None,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            metadata: serde_json::Value::Null,
            created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_play_pause_yields_segment() {
        let events = vec![
            event(EventKind::Play, Some(10.0), 0),
            event(EventKind::Pause, Some(40.0), 30),
        ];
        assert_eq!(
            watch_segments(&events),
            vec![WatchSegment {
                start: 10.0,
                end: 40.0
            }]
        );
    }

    #[test]
    fn test_backward_close_discarded() {
        let events = vec![
            event(EventKind::Play, Some(50.0), 0),
            event(EventKind::Seek, Some(20.0), 5),
        ];
        assert!(watch_segments(&events).is_empty());
    }

    #[test]
    fn test_speed_change_does_not_interrupt() {
        let events = vec![
            event(EventKind::Play, Some(0.0), 0),
            event(EventKind::SpeedChange, Some(15.0), 15),
            event(EventKind::Pause, Some(30.0), 30),
        ];
        assert_eq!(
            watch_segments(&events),
            vec![WatchSegment {
                start: 0.0,
                end: 30.0
            }]
        );
    }

    #[test]
    fn test_unclosed_play_contributes_nothing() {
        let events = vec![event(EventKind::Play, Some(10.0), 0)];
        assert!(watch_segments(&events).is_empty());
    }

    #[test]
    fn test_segment_overlap_clamps() {
        let seg = WatchSegment {
            start: 10.0,
            end: 40.0,
        };
        assert_eq!(seg.overlap(0.0, 20.0), 10.0);
        assert_eq!(seg.overlap(20.0, 30.0), 10.0);
        assert_eq!(seg.overlap(50.0, 60.0), 0.0);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
    }
}
