//! Behavioral cluster assignment
//!
//! Students are assigned to exactly one of the fixed cohorts in
//! [`BehavioralCluster`] by an ordered rule table over extracted
//! interaction features. Each rule is a plain predicate on the feature
//! struct, auditable in isolation; the first matching rule wins and the
//! table ends in an unconditional default, so assignment is total.

use super::watch_segments;
use crate::config::ClusterThresholds;
use crate::types::{BehavioralCluster, EventKind, Lecture, StudentTimeline};
use chrono::Timelike;
use std::collections::HashMap;

/// Interaction features extracted from one student's timelines.
#[derive(Debug, Clone, Default)]
pub struct StudentFeatures {
    /// Rewind events per minute of watched playback
    pub replay_rate: f64,
    /// Mean playback speed over play and speed-change events, 1.0 when unknown
    pub avg_playback_speed: f64,
    /// Note events per minute of watched playback
    pub note_event_rate: f64,
    /// Hour-of-day histogram (UTC) over all event timestamps
    pub session_hours: [u32; 24],
    /// Variance of inter-event gaps within a timeline, seconds squared
    pub pacing_variance: f64,
    /// Fraction of assigned lecture time actually watched, `[0, 1]`
    pub engagement: f64,
}

impl StudentFeatures {
    /// Extract features from a student's timelines.
    ///
    /// `lectures` supplies durations for the engagement denominator, keyed
    /// by lecture id; timelines for unknown lectures still contribute to
    /// the rate features.
    pub fn extract(timelines: &[StudentTimeline], lectures: &HashMap<String, Lecture>) -> Self {
        let mut rewind_count = 0usize;
        let mut note_count = 0usize;
        let mut watched_secs = 0.0f64;
        let mut speeds = Vec::new();
        let mut session_hours = [0u32; 24];
        let mut gaps = Vec::new();
        let mut engagement_samples = Vec::new();

        for timeline in timelines {
            rewind_count += timeline.rewinds.len();

            let segments = watch_segments(&timeline.events);
            let timeline_watched: f64 = segments.iter().map(|s| s.end - s.start).sum();
            watched_secs += timeline_watched;

            for event in &timeline.events {
                if event.kind == EventKind::Note {
                    note_count += 1;
                }
                if matches!(event.kind, EventKind::Play | EventKind::SpeedChange) {
                    if let Some(speed) = event.playback_speed {
                        speeds.push(speed);
                    }
                }
                session_hours[event.timestamp.hour() as usize] += 1;
            }
            for rewind in &timeline.rewinds {
                session_hours[rewind.timestamp.hour() as usize] += 1;
            }

            let mut stamps: Vec<_> = timeline
                .events
                .iter()
                .map(|e| e.timestamp)
                .chain(timeline.rewinds.iter().map(|r| r.timestamp))
                .collect();
            stamps.sort();
            for pair in stamps.windows(2) {
                gaps.push((pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0);
            }

            if let Some(lecture) = lectures.get(&timeline.lecture_id) {
                if lecture.duration_secs > 0.0 {
                    engagement_samples.push((timeline_watched / lecture.duration_secs).min(1.0));
                }
            }
        }

        // Clamped so rates stay defined for rewind-only timelines
        let minutes_watched = (watched_secs / 60.0).max(1.0);

        Self {
            replay_rate: rewind_count as f64 / minutes_watched,
            avg_playback_speed: if speeds.is_empty() {
                1.0
            } else {
                speeds.iter().sum::<f64>() / speeds.len() as f64
            },
            note_event_rate: note_count as f64 / minutes_watched,
            session_hours,
            pacing_variance: variance(&gaps),
            engagement: if engagement_samples.is_empty() {
                0.0
            } else {
                engagement_samples.iter().sum::<f64>() / engagement_samples.len() as f64
            },
        }
    }

    fn late_night_majority(&self, thresholds: &ClusterThresholds) -> bool {
        let total: u32 = self.session_hours.iter().sum();
        if total == 0 {
            return false;
        }

        let start = thresholds.late_night_start_hour;
        let end = thresholds.late_night_end_hour;
        let late: u32 = (0..24u32)
            .filter(|&h| {
                if start <= end {
                    h >= start && h < end
                } else {
                    // Window wraps midnight, e.g. 22 -> 04
                    h >= start || h < end
                }
            })
            .map(|h| self.session_hours[h as usize])
            .sum();

        late * 2 > total
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

struct Rule {
    cluster: BehavioralCluster,
    matches: fn(&StudentFeatures, &ClusterThresholds) -> bool,
}

// Evaluated top to bottom, first match wins
const RULES: &[Rule] = &[
    Rule {
        cluster: BehavioralCluster::HighReplay,
        matches: |f, t| f.replay_rate > t.replay_rate_threshold,
    },
    Rule {
        cluster: BehavioralCluster::LateNightLearner,
        matches: |f, t| f.late_night_majority(t),
    },
    Rule {
        cluster: BehavioralCluster::NoteTaker,
        matches: |f, t| f.note_event_rate > t.note_rate_threshold,
    },
    Rule {
        cluster: BehavioralCluster::FastWatcher,
        matches: |f, t| f.avg_playback_speed > 1.0 + t.speed_margin,
    },
];

/// Assign a student to a behavioral cluster.
///
/// Deterministic and total: the same features always yield the same
/// cluster, and every student gets one ([`BehavioralCluster::SteadyPacer`]
/// when no rule fires).
pub fn assign_cluster(
    features: &StudentFeatures,
    thresholds: &ClusterThresholds,
) -> BehavioralCluster {
    RULES
        .iter()
        .find(|rule| (rule.matches)(features, thresholds))
        .map(|rule| rule.cluster)
        .unwrap_or(BehavioralCluster::SteadyPacer)
}

/// One student's cluster assignment within a course, the rollup input.
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub student_id: String,
    pub cluster: BehavioralCluster,
    /// Engagement proxy carried from feature extraction, `[0, 1]`
    pub engagement: f64,
    /// Lectures the student has activity in
    pub lecture_ids: Vec<String>,
}
