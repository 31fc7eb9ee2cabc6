//! Student timeline store
//!
//! The core does not own persistence: the document store is an external
//! collaborator, and [`TimelineStore`] is the access contract the core
//! requires of it. [`Database`] is the bundled SQLite reference backend
//! used by the CLI and by tests.
//!
//! Contract guarantees:
//! - `append` is idempotent on event id: re-appending a previously seen
//!   id is a no-op, absorbing client retry duplication.
//! - timelines read back ordered by timestamp ascending, which the
//!   aggregation layer depends on.
//! - `touch` never moves `last_accessed_at` backward.
//!
//! Appends from different students land in disjoint (student, lecture)
//! partitions and need no coordination.

mod schema;
mod sqlite;

pub use sqlite::Database;

use crate::error::Result;
use crate::types::{Concept, NormalizedEvent, StudentTimeline};
use chrono::{DateTime, Utc};

/// Access contract between the core and the document store collaborator.
pub trait TimelineStore {
    /// Append a normalized event to the student's lecture timeline.
    ///
    /// Returns `true` if the event was stored, `false` if its id had been
    /// seen before (duplicate, no-op).
    fn append(&self, student_id: &str, lecture_id: &str, event: &NormalizedEvent) -> Result<bool>;

    /// Read one student's timeline for a lecture, timestamp ascending.
    fn read_timeline(&self, student_id: &str, lecture_id: &str) -> Result<StudentTimeline>;

    /// Advance `last_accessed_at` for the (student, lecture) entry.
    /// Timestamps earlier than the stored value are ignored.
    fn touch(&self, student_id: &str, lecture_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// The ordered concept list for a lecture, `None` when the lecture is
    /// unknown.
    fn lecture_concepts(&self, lecture_id: &str) -> Result<Option<Vec<Concept>>>;

    /// All students' timelines for a lecture.
    fn lecture_timelines(&self, lecture_id: &str) -> Result<Vec<StudentTimeline>>;

    /// Distinct student ids with any activity in a course.
    fn course_students(&self, course_id: &str) -> Result<Vec<String>>;
}
