//! Per-concept struggle aggregation
//!
//! Folds every student's timeline for one lecture into one
//! [`ConceptInsight`] per concept. Pure: identical inputs yield identical
//! output, and nothing is written back.

use super::{watch_segments, CancelToken};
use crate::config::StruggleConfig;
use crate::error::{Error, Result};
use crate::types::{ConceptInsight, EventKind, Lecture, StudentTimeline};
use std::collections::HashMap;

/// Aggregate all students' timelines into per-concept insights.
///
/// Returns one insight per concept, in the lecture's concept order. A
/// lecture with zero concepts yields an empty vector. Cancellation is
/// checked between per-student folds.
pub fn aggregate(
    lecture: &Lecture,
    timelines: &[StudentTimeline],
    weights: &StruggleConfig,
    cancel: &CancelToken,
) -> Result<Vec<ConceptInsight>> {
    let concepts = &lecture.concepts;
    if concepts.is_empty() {
        return Ok(Vec::new());
    }

    let index: HashMap<&str, usize> = concepts
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut replay_counts = vec![0u64; concepts.len()];
    let mut drop_off_counts = vec![0u64; concepts.len()];
    let mut watch_sums = vec![0.0f64; concepts.len()];
    let mut visitor_counts = vec![0u64; concepts.len()];

    for timeline in timelines {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for rewind in &timeline.rewinds {
            if let Some(i) = rewind.to_concept_id.as_deref().and_then(|id| index.get(id)) {
                replay_counts[*i] += 1;
            }
        }

        for event in &timeline.events {
            if event.kind == EventKind::DropOff {
                if let Some(i) = event.concept_id.as_deref().and_then(|id| index.get(id)) {
                    drop_off_counts[*i] += 1;
                }
            }
        }

        let segments = watch_segments(&timeline.events);
        for (i, concept) in concepts.iter().enumerate() {
            let watched: f64 = segments
                .iter()
                .map(|s| s.overlap(concept.start_time, concept.end_time))
                .sum();

            let visited = watched > 0.0
                || timeline
                    .events
                    .iter()
                    .any(|e| e.concept_id.as_deref() == Some(concept.id.as_str()))
                || timeline.rewinds.iter().any(|r| {
                    r.to_concept_id.as_deref() == Some(concept.id.as_str())
                        || r.from_concept_id.as_deref() == Some(concept.id.as_str())
                });

            if visited {
                visitor_counts[i] += 1;
                // Visit without any timed segment: the neutral estimate is
                // the full concept duration
                watch_sums[i] += if watched > 0.0 {
                    watched
                } else {
                    concept.duration()
                };
            }
        }
    }

    let raw_scores: Vec<f64> = concepts
        .iter()
        .enumerate()
        .map(|(i, concept)| {
            let avg_watch = if visitor_counts[i] > 0 {
                watch_sums[i] / visitor_counts[i] as f64
            } else {
                concept.duration()
            };
            let expected = concept.duration();
            let watch_term = if expected > 0.0 {
                (avg_watch / expected).min(1.0)
            } else {
                0.0
            };
            weights.replay_weight * replay_counts[i] as f64
                + weights.drop_off_weight * drop_off_counts[i] as f64
                - weights.watch_time_weight * watch_term
        })
        .collect();

    let normalized = min_max_normalize(&raw_scores);

    Ok(concepts
        .iter()
        .enumerate()
        .map(|(i, concept)| ConceptInsight {
            concept_id: concept.id.clone(),
            concept_name: concept.name.clone(),
            replay_count: replay_counts[i],
            drop_off_count: drop_off_counts[i],
            avg_watch_time: if visitor_counts[i] > 0 {
                watch_sums[i] / visitor_counts[i] as f64
            } else {
                concept.duration()
            },
            struggle_score: normalized[i],
        })
        .collect())
}

/// Insights sorted by descending struggle score.
///
/// The sort is stable: ties keep the lecture's concept order.
pub fn rank_by_struggle(mut insights: Vec<ConceptInsight>) -> Vec<ConceptInsight> {
    insights.sort_by(|a, b| {
        b.struggle_score
            .partial_cmp(&a.struggle_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    insights
}

/// Min-max normalize to `[0, 1]`; a degenerate span maps everything to 0.
fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    if span <= 0.0 || !span.is_finite() {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / span).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalyticsEvent, Concept, RewindEvent};
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn lecture() -> Lecture {
        let concepts = vec![
            Concept {
                id: "c1".to_string(),
                name: "Loss surfaces".to_string(),
                summary: None,
                start_time: 0.0,
                end_time: 100.0,
                lecture_id: "lec1".to_string(),
            },
            Concept {
                id: "c2".to_string(),
                name: "Learning rate".to_string(),
                summary: None,
                start_time: 100.0,
                end_time: 200.0,
                lecture_id: "lec1".to_string(),
            },
            Concept {
                id: "c3".to_string(),
                name: "Momentum".to_string(),
                summary: None,
                start_time: 200.0,
                end_time: 300.0,
                lecture_id: "lec1".to_string(),
            },
        ];
        Lecture {
            id: "lec1".to_string(),
            course_id: "course1".to_string(),
            title: "Gradient Descent".to_string(),
            duration_secs: 300.0,
            concepts,
        }
    }

    fn rewind_into(concept_id: &str, from: f64, to: f64, secs: i64) -> RewindEvent {
        RewindEvent {
            id: format!("rw-{}", secs),
            from_time: from,
            to_time: to,
            rewind_amount: from - to,
            from_concept_id: None,
            to_concept_id: Some(concept_id.to_string()),
            timestamp: ts(secs),
            created_at: ts(secs),
        }
    }

    fn event(kind: EventKind, position: f64, concept_id: Option<&str>, secs: i64) -> AnalyticsEvent {
        AnalyticsEvent {
            id: format!("evt-{}", secs),
            student_id: "s1".to_string(),
            course_id: "course1".to_string(),
            lecture_id: "lec1".to_string(),
            concept_id: concept_id.map(String::from),
            kind,
            position: Some(position),
            playback_speed: None,
            timestamp: ts(secs),
            metadata: serde_json::Value::Null,
            created_at: ts(secs),
        }
    }

    fn timeline(rewinds: Vec<RewindEvent>, events: Vec<AnalyticsEvent>) -> StudentTimeline {
        StudentTimeline {
            student_id: "s1".to_string(),
            lecture_id: "lec1".to_string(),
            rewinds,
            events,
            last_accessed_at: None,
        }
    }

    #[test]
    fn test_zero_concepts_yields_empty() {
        let mut lecture = lecture();
        lecture.concepts.clear();
        // Rewinds land outside any labeled segment and are simply unused
        let rewinds: Vec<_> = (0..5)
            .map(|i| {
                let mut r = rewind_into("c1", 80.0, 20.0, i * 10);
                r.to_concept_id = None;
                r
            })
            .collect();
        let insights = aggregate(
            &lecture,
            &[timeline(rewinds, vec![])],
            &StruggleConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(insights.is_empty());
    }

    #[test]
    fn test_replays_drive_struggle_score() {
        let timelines = vec![timeline(
            vec![
                rewind_into("c2", 150.0, 110.0, 0),
                rewind_into("c2", 160.0, 120.0, 10),
                rewind_into("c2", 170.0, 130.0, 20),
            ],
            vec![],
        )];

        let insights = aggregate(
            &lecture(),
            &timelines,
            &StruggleConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(insights[1].concept_id, "c2");
        assert_eq!(insights[1].replay_count, 3);
        assert_eq!(insights[1].struggle_score, 1.0);
        assert!(insights[0].struggle_score < insights[1].struggle_score);
        assert!(insights[2].struggle_score < insights[1].struggle_score);
    }

    #[test]
    fn test_drop_offs_counted_per_concept() {
        let timelines = vec![timeline(
            vec![],
            vec![
                event(EventKind::DropOff, 50.0, Some("c1"), 0),
                event(EventKind::DropOff, 60.0, Some("c1"), 10),
                event(EventKind::DropOff, 150.0, Some("c2"), 20),
            ],
        )];

        let insights = aggregate(
            &lecture(),
            &timelines,
            &StruggleConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(insights[0].drop_off_count, 2);
        assert_eq!(insights[1].drop_off_count, 1);
        assert_eq!(insights[2].drop_off_count, 0);
    }

    #[test]
    fn test_watch_time_from_play_pause_segments() {
        let timelines = vec![timeline(
            vec![],
            vec![
                event(EventKind::Play, 0.0, Some("c1"), 0),
                event(EventKind::Pause, 50.0, Some("c1"), 50),
            ],
        )];

        let insights = aggregate(
            &lecture(),
            &timelines,
            &StruggleConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(insights[0].avg_watch_time, 50.0);
    }

    #[test]
    fn test_visitor_without_segments_gets_neutral_estimate() {
        // A note inside c2 marks the visit but carries no playback span
        let timelines = vec![timeline(
            vec![],
            vec![event(EventKind::Note, 150.0, Some("c2"), 0)],
        )];

        let insights = aggregate(
            &lecture(),
            &timelines,
            &StruggleConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(insights[1].avg_watch_time, 100.0);
    }

    #[test]
    fn test_aggregate_is_pure() {
        let timelines = vec![timeline(
            vec![rewind_into("c1", 80.0, 20.0, 0)],
            vec![
                event(EventKind::Play, 0.0, Some("c1"), 0),
                event(EventKind::DropOff, 90.0, Some("c1"), 90),
            ],
        )];
        let weights = StruggleConfig::default();

        let first = aggregate(&lecture(), &timelines, &weights, &CancelToken::new()).unwrap();
        let second = aggregate(&lecture(), &timelines, &weights, &CancelToken::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_additional_replay_never_lowers_relative_score() {
        let base = vec![timeline(
            vec![rewind_into("c2", 150.0, 110.0, 0)],
            vec![event(EventKind::DropOff, 50.0, Some("c1"), 5)],
        )];
        let more = vec![timeline(
            vec![
                rewind_into("c2", 150.0, 110.0, 0),
                rewind_into("c2", 160.0, 120.0, 10),
            ],
            vec![event(EventKind::DropOff, 50.0, Some("c1"), 5)],
        )];
        let weights = StruggleConfig::default();

        let before = aggregate(&lecture(), &base, &weights, &CancelToken::new()).unwrap();
        let after = aggregate(&lecture(), &more, &weights, &CancelToken::new()).unwrap();
        assert!(after[1].struggle_score >= before[1].struggle_score);
    }

    #[test]
    fn test_degenerate_span_normalizes_to_zero() {
        // No events at all: every concept gets the same raw score
        let insights = aggregate(
            &lecture(),
            &[],
            &StruggleConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(insights.iter().all(|i| i.struggle_score == 0.0));
    }

    #[test]
    fn test_cancellation_aborts_fold() {
        let token = CancelToken::new();
        token.cancel();

        let err = aggregate(
            &lecture(),
            &[timeline(vec![], vec![])],
            &StruggleConfig::default(),
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_rank_by_struggle_is_stable_on_ties() {
        let insights = vec![
            ConceptInsight {
                concept_id: "a".to_string(),
                concept_name: "A".to_string(),
                replay_count: 0,
                drop_off_count: 0,
                avg_watch_time: 0.0,
                struggle_score: 0.5,
            },
            ConceptInsight {
                concept_id: "b".to_string(),
                concept_name: "B".to_string(),
                replay_count: 0,
                drop_off_count: 0,
                avg_watch_time: 0.0,
                struggle_score: 0.5,
            },
            ConceptInsight {
                concept_id: "c".to_string(),
                concept_name: "C".to_string(),
                replay_count: 0,
                drop_off_count: 0,
                avg_watch_time: 0.0,
                struggle_score: 0.9,
            },
        ];

        let ranked = rank_by_struggle(insights);
        assert_eq!(ranked[0].concept_id, "c");
        assert_eq!(ranked[1].concept_id, "a");
        assert_eq!(ranked[2].concept_id, "b");
    }
}
