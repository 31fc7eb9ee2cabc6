//! SQLite reference backend for the timeline store contract
//!
//! Host platforms persist timelines in their own document store; this
//! backend exists so the CLI and tests have a durable store with the same
//! contract semantics (idempotent append, ordered read-back).

use super::schema;
use super::TimelineStore;
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// Database handle (single connection, serialized on a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Foreign keys plus WAL mode for concurrent readers
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        schema::run_migrations(&conn)
    }

    // ============================================
    // Lecture operations
    // ============================================

    /// Insert or update a lecture and its concept list.
    ///
    /// Concepts are immutable once authored; re-upserting a lecture
    /// replaces its concept rows wholesale rather than merging.
    pub fn upsert_lecture(&self, lecture: &Lecture) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO lectures (id, course_id, title, duration_secs)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                course_id = excluded.course_id,
                title = excluded.title,
                duration_secs = excluded.duration_secs
            "#,
            params![
                lecture.id,
                lecture.course_id,
                lecture.title,
                lecture.duration_secs
            ],
        )?;

        conn.execute(
            "DELETE FROM concepts WHERE lecture_id = ?1",
            [&lecture.id],
        )?;
        for concept in &lecture.concepts {
            conn.execute(
                r#"
                INSERT INTO concepts (id, lecture_id, name, summary, start_time, end_time)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    concept.id,
                    lecture.id,
                    concept.name,
                    concept.summary,
                    concept.start_time,
                    concept.end_time,
                ],
            )?;
        }
        Ok(())
    }

    /// Get a lecture with its ordered concepts
    pub fn get_lecture(&self, id: &str) -> Result<Option<Lecture>> {
        let conn = self.conn.lock().unwrap();
        let lecture = conn
            .query_row(
                "SELECT id, course_id, title, duration_secs FROM lectures WHERE id = ?1",
                [id],
                Self::row_to_lecture,
            )
            .optional()?;

        let Some(mut lecture) = lecture else {
            return Ok(None);
        };
        lecture.concepts = Self::query_concepts(&conn, id)?;
        Ok(Some(lecture))
    }

    /// All lectures in a course, with concepts
    pub fn course_lectures(&self, course_id: &str) -> Result<Vec<Lecture>> {
        let ids: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt =
                conn.prepare("SELECT id FROM lectures WHERE course_id = ?1 ORDER BY id")?;
            let rows = stmt.query_map([course_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut lectures = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(lecture) = self.get_lecture(&id)? {
                lectures.push(lecture);
            }
        }
        Ok(lectures)
    }

    fn query_concepts(conn: &Connection, lecture_id: &str) -> Result<Vec<Concept>> {
        let mut stmt = conn.prepare(
            "SELECT id, lecture_id, name, summary, start_time, end_time
             FROM concepts WHERE lecture_id = ?1 ORDER BY start_time",
        )?;
        let rows = stmt.query_map([lecture_id], Self::row_to_concept)?;
        rows.collect::<rusqlite::Result<_>>().map_err(Error::from)
    }

    fn row_to_lecture(row: &Row) -> rusqlite::Result<Lecture> {
        Ok(Lecture {
            id: row.get("id")?,
            course_id: row.get("course_id")?,
            title: row.get("title")?,
            duration_secs: row.get("duration_secs")?,
            concepts: Vec::new(),
        })
    }

    fn row_to_concept(row: &Row) -> rusqlite::Result<Concept> {
        Ok(Concept {
            id: row.get("id")?,
            lecture_id: row.get("lecture_id")?,
            name: row.get("name")?,
            summary: row.get("summary")?,
            start_time: row.get("start_time")?,
            end_time: row.get("end_time")?,
        })
    }

    // ============================================
    // Timeline operations
    // ============================================

    /// The (student, lecture) entries for one student, as the document
    /// store embeds them.
    pub fn student_entries(&self, student_id: &str) -> Result<Vec<StudentLectureEntry>> {
        let rows: Vec<(String, Option<String>, String, Option<String>)> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT lecture_id, lecture_title, assigned_at, last_accessed_at
                 FROM student_lectures WHERE student_id = ?1 ORDER BY lecture_id",
            )?;
            let mapped = stmt.query_map([student_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let mut entries = Vec::with_capacity(rows.len());
        for (lecture_id, title, assigned_at, last_accessed) in rows {
            let timeline = self.read_timeline(student_id, &lecture_id)?;
            entries.push(StudentLectureEntry {
                lecture_title: title.unwrap_or_else(|| lecture_id.clone()),
                lecture_id,
                assigned_at: parse_ts(&assigned_at),
                rewind_events: timeline.rewinds,
                last_accessed_at: last_accessed.map(|s| parse_ts(&s)),
            });
        }
        Ok(entries)
    }

    /// All timelines for one student, across lectures.
    pub fn student_timelines(&self, student_id: &str) -> Result<Vec<StudentTimeline>> {
        let lecture_ids: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT lecture_id FROM student_lectures WHERE student_id = ?1
                 UNION
                 SELECT lecture_id FROM analytics_events WHERE student_id = ?1
                 UNION
                 SELECT lecture_id FROM rewind_events WHERE student_id = ?1
                 ORDER BY 1",
            )?;
            let rows = stmt.query_map([student_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut timelines = Vec::with_capacity(lecture_ids.len());
        for lecture_id in lecture_ids {
            timelines.push(self.read_timeline(student_id, &lecture_id)?);
        }
        Ok(timelines)
    }

    /// Create the (student, lecture) entry if it does not exist yet.
    fn ensure_entry(
        conn: &Connection,
        student_id: &str,
        lecture_id: &str,
        course_id: &str,
        at: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        let title: Option<String> = conn
            .query_row(
                "SELECT title FROM lectures WHERE id = ?1",
                [lecture_id],
                |row| row.get(0),
            )
            .optional()?;

        conn.execute(
            r#"
            INSERT OR IGNORE INTO student_lectures
                (student_id, lecture_id, course_id, lecture_title, assigned_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![student_id, lecture_id, course_id, title, at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn row_to_rewind(row: &Row) -> rusqlite::Result<RewindEvent> {
        let ts: String = row.get("timestamp")?;
        let created: String = row.get("created_at")?;
        Ok(RewindEvent {
            id: row.get("id")?,
            from_time: row.get("from_time")?,
            to_time: row.get("to_time")?,
            rewind_amount: row.get("rewind_amount")?,
            from_concept_id: row.get("from_concept_id")?,
            to_concept_id: row.get("to_concept_id")?,
            timestamp: parse_ts(&ts),
            created_at: parse_ts(&created),
        })
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<AnalyticsEvent> {
        let ts: String = row.get("timestamp")?;
        let created: String = row.get("created_at")?;
        let kind: String = row.get("kind")?;
        let metadata: Option<String> = row.get("metadata")?;
        Ok(AnalyticsEvent {
            id: row.get("id")?,
            student_id: row.get("student_id")?,
            course_id: row.get("course_id")?,
            lecture_id: row.get("lecture_id")?,
            concept_id: row.get("concept_id")?,
            kind: kind.parse().unwrap_or(EventKind::Play),
            position: row.get("position")?,
            playback_speed: row.get("playback_speed")?,
            timestamp: parse_ts(&ts),
            metadata: metadata
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null),
            created_at: parse_ts(&created),
        })
    }
}

impl TimelineStore for Database {
    fn append(&self, student_id: &str, lecture_id: &str, event: &NormalizedEvent) -> Result<bool> {
        let conn = self.conn.lock().unwrap();

        let inserted = match event {
            NormalizedEvent::Rewind {
                student_id: evt_student,
                course_id,
                lecture_id: evt_lecture,
                event,
            } => {
                Self::ensure_entry(&conn, evt_student, evt_lecture, course_id, event.timestamp)?;
                conn.execute(
                    r#"
                    INSERT OR IGNORE INTO rewind_events
                        (id, student_id, course_id, lecture_id, from_time, to_time,
                         rewind_amount, from_concept_id, to_concept_id, timestamp, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                    params![
                        event.id,
                        student_id,
                        course_id,
                        lecture_id,
                        event.from_time,
                        event.to_time,
                        event.rewind_amount,
                        event.from_concept_id,
                        event.to_concept_id,
                        event.timestamp.to_rfc3339(),
                        event.created_at.to_rfc3339(),
                    ],
                )?
            }
            NormalizedEvent::Generic(event) => {
                Self::ensure_entry(
                    &conn,
                    &event.student_id,
                    &event.lecture_id,
                    &event.course_id,
                    event.timestamp,
                )?;
                conn.execute(
                    r#"
                    INSERT OR IGNORE INTO analytics_events
                        (id, student_id, course_id, lecture_id, concept_id, kind,
                         position, playback_speed, timestamp, metadata, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                    params![
                        event.id,
                        student_id,
                        event.course_id,
                        lecture_id,
                        event.concept_id,
                        event.kind.as_str(),
                        event.position,
                        event.playback_speed,
                        event.timestamp.to_rfc3339(),
                        event.metadata.to_string(),
                        event.created_at.to_rfc3339(),
                    ],
                )?
            }
        };

        Ok(inserted > 0)
    }

    fn read_timeline(&self, student_id: &str, lecture_id: &str) -> Result<StudentTimeline> {
        let conn = self.conn.lock().unwrap();

        let mut rewinds: Vec<RewindEvent> = {
            let mut stmt = conn.prepare(
                "SELECT * FROM rewind_events
                 WHERE student_id = ?1 AND lecture_id = ?2
                 ORDER BY timestamp",
            )?;
            let rows = stmt.query_map(params![student_id, lecture_id], Self::row_to_rewind)?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut events: Vec<AnalyticsEvent> = {
            let mut stmt = conn.prepare(
                "SELECT * FROM analytics_events
                 WHERE student_id = ?1 AND lecture_id = ?2
                 ORDER BY timestamp",
            )?;
            let rows = stmt.query_map(params![student_id, lecture_id], Self::row_to_event)?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        // Explicit sort-on-read: stored RFC3339 strings with mixed
        // sub-second precision do not collate perfectly.
        rewinds.sort_by_key(|r| r.timestamp);
        events.sort_by_key(|e| e.timestamp);

        let last_accessed_at: Option<String> = conn
            .query_row(
                "SELECT last_accessed_at FROM student_lectures
                 WHERE student_id = ?1 AND lecture_id = ?2",
                params![student_id, lecture_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        Ok(StudentTimeline {
            student_id: student_id.to_string(),
            lecture_id: lecture_id.to_string(),
            rewinds,
            events,
            last_accessed_at: last_accessed_at.map(|s| parse_ts(&s)),
        })
    }

    fn touch(&self, student_id: &str, lecture_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::ensure_entry(&conn, student_id, lecture_id, "", at)?;
        conn.execute(
            r#"
            UPDATE student_lectures SET last_accessed_at = ?3
            WHERE student_id = ?1 AND lecture_id = ?2
              AND (last_accessed_at IS NULL OR last_accessed_at < ?3)
            "#,
            params![student_id, lecture_id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn lecture_concepts(&self, lecture_id: &str) -> Result<Option<Vec<Concept>>> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM lectures WHERE id = ?1",
                [lecture_id],
                |row| row.get(0),
            )
            .optional()?;

        if exists.is_none() {
            return Ok(None);
        }
        Self::query_concepts(&conn, lecture_id).map(Some)
    }

    fn lecture_timelines(&self, lecture_id: &str) -> Result<Vec<StudentTimeline>> {
        let student_ids: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT student_id FROM student_lectures WHERE lecture_id = ?1
                 UNION
                 SELECT student_id FROM analytics_events WHERE lecture_id = ?1
                 UNION
                 SELECT student_id FROM rewind_events WHERE lecture_id = ?1
                 ORDER BY 1",
            )?;
            let rows = stmt.query_map([lecture_id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut timelines = Vec::with_capacity(student_ids.len());
        for student_id in student_ids {
            timelines.push(self.read_timeline(&student_id, lecture_id)?);
        }
        Ok(timelines)
    }

    fn course_students(&self, course_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT student_id FROM analytics_events WHERE course_id = ?1
             UNION
             SELECT student_id FROM rewind_events WHERE course_id = ?1
             ORDER BY 1",
        )?;
        let rows = stmt.query_map([course_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>().map_err(Error::from)
    }
}

/// Parse an RFC3339 timestamp column, falling back to now on corruption.
fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn rewind_event(id: &str, at: DateTime<Utc>) -> NormalizedEvent {
        NormalizedEvent::Rewind {
            student_id: "s1".to_string(),
            course_id: "course1".to_string(),
            lecture_id: "lec1".to_string(),
            event: RewindEvent {
                id: id.to_string(),
                from_time: 120.5,
                to_time: 100.0,
                rewind_amount: 20.5,
                from_concept_id: Some("c2".to_string()),
                to_concept_id: Some("c1".to_string()),
                timestamp: at,
                created_at: at,
            },
        }
    }

    #[test]
    fn test_append_is_idempotent_on_event_id() {
        let db = test_db();
        let event = rewind_event("evt-1", ts(0));

        assert!(db.append("s1", "lec1", &event).unwrap());
        assert!(!db.append("s1", "lec1", &event).unwrap());

        let timeline = db.read_timeline("s1", "lec1").unwrap();
        assert_eq!(timeline.rewinds.len(), 1);
        assert_eq!(timeline.rewinds[0].rewind_amount, 20.5);
    }

    #[test]
    fn test_read_timeline_ordered_by_timestamp() {
        let db = test_db();
        // Append out of order
        db.append("s1", "lec1", &rewind_event("evt-b", ts(60)))
            .unwrap();
        db.append("s1", "lec1", &rewind_event("evt-a", ts(10)))
            .unwrap();

        let timeline = db.read_timeline("s1", "lec1").unwrap();
        assert_eq!(timeline.rewinds.len(), 2);
        assert!(timeline.rewinds[0].timestamp < timeline.rewinds[1].timestamp);
        assert_eq!(timeline.rewinds[0].id, "evt-a");
    }

    #[test]
    fn test_touch_never_moves_backward() {
        let db = test_db();
        db.append("s1", "lec1", &rewind_event("evt-1", ts(0)))
            .unwrap();

        db.touch("s1", "lec1", ts(100)).unwrap();
        db.touch("s1", "lec1", ts(50)).unwrap();

        let timeline = db.read_timeline("s1", "lec1").unwrap();
        assert_eq!(timeline.last_accessed_at, Some(ts(100)));
    }

    #[test]
    fn test_lecture_round_trip_with_concepts() {
        let db = test_db();
        let lecture = Lecture {
            id: "lec1".to_string(),
            course_id: "course1".to_string(),
            title: "Gradient Descent".to_string(),
            duration_secs: 600.0,
            concepts: vec![
                Concept {
                    id: "c1".to_string(),
                    name: "Loss surfaces".to_string(),
                    summary: Some("What we minimize".to_string()),
                    start_time: 0.0,
                    end_time: 300.0,
                    lecture_id: "lec1".to_string(),
                },
                Concept {
                    id: "c2".to_string(),
                    name: "Learning rate".to_string(),
                    summary: None,
                    start_time: 300.0,
                    end_time: 600.0,
                    lecture_id: "lec1".to_string(),
                },
            ],
        };
        db.upsert_lecture(&lecture).unwrap();

        let loaded = db.get_lecture("lec1").unwrap().unwrap();
        assert_eq!(loaded.title, "Gradient Descent");
        assert_eq!(loaded.concepts.len(), 2);
        assert_eq!(loaded.concepts[0].id, "c1");

        let concepts = db.lecture_concepts("lec1").unwrap().unwrap();
        assert_eq!(concepts.len(), 2);
        assert!(db.lecture_concepts("missing").unwrap().is_none());
    }

    #[test]
    fn test_course_students_deduplicates() {
        let db = test_db();
        db.append("s1", "lec1", &rewind_event("evt-1", ts(0)))
            .unwrap();
        db.append("s1", "lec1", &rewind_event("evt-2", ts(5)))
            .unwrap();

        let generic = NormalizedEvent::Generic(AnalyticsEvent {
            id: "evt-3".to_string(),
            student_id: "s2".to_string(),
            course_id: "course1".to_string(),
            lecture_id: "lec1".to_string(),
            concept_id: None,
            kind: EventKind::Play,
            position: Some(0.0),
            playback_speed: Some(1.0),
            timestamp: ts(1),
            metadata: serde_json::Value::Null,
            created_at: ts(1),
        });
        db.append("s2", "lec1", &generic).unwrap();

        let students = db.course_students("course1").unwrap();
        assert_eq!(students, vec!["s1".to_string(), "s2".to_string()]);
    }
}
