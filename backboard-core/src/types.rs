//! Core domain types for backboard analytics
//!
//! These types form the canonical data model that normalizes raw client
//! interaction events into the records the aggregation layers consume.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Concept** | A labeled, non-overlapping time segment within a lecture video |
//! | **Lecture** | A video with an ordered list of Concepts, belonging to a Course |
//! | **RewindEvent** | A student moving playback backward, bounded by `from_time`/`to_time` |
//! | **AnalyticsEvent** | Generic interaction record (play/pause/seek/drop-off/...) |
//! | **StudentTimeline** | One student's ordered event history for one lecture |
//! | **BehavioralCluster** | Fixed cohort label summarizing a student's interaction pattern |
//!
//! Raw events are normalized once at ingest and appended immutably; every
//! derived artifact ([`ConceptInsight`], [`ClusterInsight`], cluster labels)
//! is a pure projection of the append-only log and can be recomputed at any
//! time without loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Lectures and concepts
// ============================================

/// A labeled time segment within a lecture video.
///
/// Concepts are authored with the lecture and immutable thereafter.
/// Within one lecture they are non-overlapping and ordered by `start_time`,
/// and each covers the half-open interval `[start_time, end_time)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    /// Unique identifier
    pub id: String,
    /// Display name (e.g., "Backpropagation")
    pub name: String,
    /// Short instructor-authored summary
    #[serde(default)]
    pub summary: Option<String>,
    /// Segment start in seconds of playback time
    pub start_time: f64,
    /// Segment end in seconds of playback time (exclusive)
    pub end_time: f64,
    /// Lecture this concept belongs to
    pub lecture_id: String,
}

impl Concept {
    /// Playback time covered by this concept, in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Whether a playback time falls inside this concept's `[start, end)` interval.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_time && t < self.end_time
    }
}

/// A lecture video with its ordered concept list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lecture {
    /// Unique identifier
    pub id: String,
    /// Course this lecture belongs to
    pub course_id: String,
    /// Display title
    pub title: String,
    /// Total video duration in seconds
    pub duration_secs: f64,
    /// Concepts ordered by `start_time`, non-overlapping
    #[serde(default)]
    pub concepts: Vec<Concept>,
}

// ============================================
// Event kinds
// ============================================

/// Closed enumeration of client interaction event types.
///
/// Unknown `event_type` strings from the client are rejected at ingest,
/// never carried through as opaque values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Play,
    Pause,
    Seek,
    Rewind,
    DropOff,
    SpeedChange,
    ConceptJump,
    Note,
}

impl EventKind {
    /// Identifier used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Play => "play",
            EventKind::Pause => "pause",
            EventKind::Seek => "seek",
            EventKind::Rewind => "rewind",
            EventKind::DropOff => "drop_off",
            EventKind::SpeedChange => "speed_change",
            EventKind::ConceptJump => "concept_jump",
            EventKind::Note => "note",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(EventKind::Play),
            "pause" => Ok(EventKind::Pause),
            "seek" => Ok(EventKind::Seek),
            "rewind" => Ok(EventKind::Rewind),
            "drop_off" => Ok(EventKind::DropOff),
            "speed_change" => Ok(EventKind::SpeedChange),
            "concept_jump" => Ok(EventKind::ConceptJump),
            "note" => Ok(EventKind::Note),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

// ============================================
// Raw and normalized events
// ============================================

/// A raw client-reported interaction event.
///
/// This is the loosely-typed payload as it arrives over the wire: every
/// field is optional and nothing is trusted. [`crate::ingest::ingest`] is
/// the validation boundary that turns this into a [`NormalizedEvent`] or
/// rejects it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvent {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub course_id: Option<String>,
    pub lecture_id: Option<String>,
    pub event_type: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Playback position for play/pause/seek/drop-off/concept-jump/note
    pub position: Option<f64>,
    /// Rewind origin, seconds
    pub from_time: Option<f64>,
    /// Rewind destination, seconds
    pub to_time: Option<f64>,
    /// New speed for speed-change, current speed on play
    pub playback_speed: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

/// A generic normalized interaction event.
///
/// The superset record covering every [`EventKind`] except the rewind
/// specialization, which carries its own concept-transition detail in
/// [`RewindEvent`]. Both feed the same aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub lecture_id: String,
    /// Concept containing `position` at event time, if any
    pub concept_id: Option<String>,
    pub kind: EventKind,
    /// Playback position in seconds, when the event type carries one
    pub position: Option<f64>,
    /// Playback speed, for play and speed-change events
    pub playback_speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "serde_json::Value::default")]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A student moving playback backward.
///
/// Invariant: `rewind_amount == from_time - to_time > 0`. The concept
/// fields name the concepts whose `[start, end)` interval contains the
/// respective time, absent when the time falls outside any labeled
/// segment (intro/outro). Owned by the student's lecture timeline,
/// append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewindEvent {
    pub id: String,
    pub from_time: f64,
    pub to_time: f64,
    pub rewind_amount: f64,
    pub from_concept_id: Option<String>,
    pub to_concept_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Output of the ingest boundary: a validated, concept-resolved event.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    /// Rewind specialization with concept-transition detail
    Rewind {
        student_id: String,
        course_id: String,
        lecture_id: String,
        event: RewindEvent,
    },
    /// Everything else
    Generic(AnalyticsEvent),
}

impl NormalizedEvent {
    /// Event id, the idempotency key for append.
    pub fn id(&self) -> &str {
        match self {
            NormalizedEvent::Rewind { event, .. } => &event.id,
            NormalizedEvent::Generic(event) => &event.id,
        }
    }

    pub fn student_id(&self) -> &str {
        match self {
            NormalizedEvent::Rewind { student_id, .. } => student_id,
            NormalizedEvent::Generic(event) => &event.student_id,
        }
    }

    pub fn lecture_id(&self) -> &str {
        match self {
            NormalizedEvent::Rewind { lecture_id, .. } => lecture_id,
            NormalizedEvent::Generic(event) => &event.lecture_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            NormalizedEvent::Rewind { event, .. } => event.timestamp,
            NormalizedEvent::Generic(event) => event.timestamp,
        }
    }
}

// ============================================
// Timelines
// ============================================

/// One (student, lecture) entry as the document store embeds it.
///
/// Grows only by appending to `rewind_events` and advancing
/// `last_accessed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLectureEntry {
    pub lecture_id: String,
    pub lecture_title: String,
    pub assigned_at: DateTime<Utc>,
    pub rewind_events: Vec<RewindEvent>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

/// Read-side view of a student's history for one lecture.
///
/// Both vectors are ordered by timestamp ascending, which the store
/// contract guarantees (stored ordering or sort-on-read).
#[derive(Debug, Clone, Default)]
pub struct StudentTimeline {
    pub student_id: String,
    pub lecture_id: String,
    /// Rewind events, timestamp ascending
    pub rewinds: Vec<RewindEvent>,
    /// Generic events, timestamp ascending
    pub events: Vec<AnalyticsEvent>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

// ============================================
// Derived insight (regenerable)
// ============================================

/// Per-concept struggle statistics, recomputed on demand from timelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptInsight {
    pub concept_id: String,
    pub concept_name: String,
    /// Rewind events across all students landing inside this concept
    pub replay_count: u64,
    /// Drop-off events attributed to this concept
    pub drop_off_count: u64,
    /// Mean time students spent with playback inside the concept, seconds
    pub avg_watch_time: f64,
    /// Weighted, min-max normalized score in `[0, 1]`
    pub struggle_score: f64,
}

/// Fixed behavioral cohort labels.
///
/// A student has at most one assigned cluster at any time; reassignment
/// replaces the prior value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BehavioralCluster {
    HighReplay,
    FastWatcher,
    NoteTaker,
    LateNightLearner,
    SteadyPacer,
}

impl BehavioralCluster {
    /// Identifier used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            BehavioralCluster::HighReplay => "high-replay",
            BehavioralCluster::FastWatcher => "fast-watcher",
            BehavioralCluster::NoteTaker => "note-taker",
            BehavioralCluster::LateNightLearner => "late-night-learner",
            BehavioralCluster::SteadyPacer => "steady-pacer",
        }
    }

    /// Instructor-facing display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            BehavioralCluster::HighReplay => "High Replay",
            BehavioralCluster::FastWatcher => "Fast Watcher",
            BehavioralCluster::NoteTaker => "Note Taker",
            BehavioralCluster::LateNightLearner => "Late Night Learner",
            BehavioralCluster::SteadyPacer => "Steady Pacer",
        }
    }
}

impl std::fmt::Display for BehavioralCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BehavioralCluster {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high-replay" => Ok(BehavioralCluster::HighReplay),
            "fast-watcher" => Ok(BehavioralCluster::FastWatcher),
            "note-taker" => Ok(BehavioralCluster::NoteTaker),
            "late-night-learner" => Ok(BehavioralCluster::LateNightLearner),
            "steady-pacer" => Ok(BehavioralCluster::SteadyPacer),
            _ => Err(format!("unknown behavioral cluster: {}", s)),
        }
    }
}

/// Cohort-level rollup for instructors: all students sharing a cluster
/// within one course scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInsight {
    pub cluster: BehavioralCluster,
    pub student_count: u64,
    /// Concept ids above the struggle threshold, descending by score
    pub struggling_concepts: Vec<String>,
    /// Mean engagement proxy across the cluster's students, `[0, 1]`
    pub avg_engagement: f64,
}
