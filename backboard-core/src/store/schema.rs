//! SQLite schema and migrations
//!
//! Embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Lecture authoring data (immutable after creation)
    -- ============================================

    CREATE TABLE IF NOT EXISTS lectures (
        id               TEXT PRIMARY KEY,
        course_id        TEXT NOT NULL,
        title            TEXT NOT NULL,
        duration_secs    REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_lectures_course ON lectures(course_id);

    CREATE TABLE IF NOT EXISTS concepts (
        id               TEXT PRIMARY KEY,
        lecture_id       TEXT NOT NULL REFERENCES lectures(id),
        name             TEXT NOT NULL,
        summary          TEXT,
        start_time       REAL NOT NULL,
        end_time         REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_concepts_lecture
        ON concepts(lecture_id, start_time);

    -- ============================================
    -- Append-only student timelines
    -- ============================================

    CREATE TABLE IF NOT EXISTS student_lectures (
        student_id       TEXT NOT NULL,
        lecture_id       TEXT NOT NULL,
        course_id        TEXT,
        lecture_title    TEXT,
        assigned_at      TEXT NOT NULL,
        last_accessed_at TEXT,
        PRIMARY KEY (student_id, lecture_id)
    );

    CREATE TABLE IF NOT EXISTS rewind_events (
        id               TEXT PRIMARY KEY,
        student_id       TEXT NOT NULL,
        course_id        TEXT NOT NULL,
        lecture_id       TEXT NOT NULL,
        from_time        REAL NOT NULL,
        to_time          REAL NOT NULL,
        rewind_amount    REAL NOT NULL,
        from_concept_id  TEXT,
        to_concept_id    TEXT,
        timestamp        TEXT NOT NULL,
        created_at       TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_rewinds_student_lecture
        ON rewind_events(student_id, lecture_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_rewinds_lecture
        ON rewind_events(lecture_id);

    CREATE TABLE IF NOT EXISTS analytics_events (
        id               TEXT PRIMARY KEY,
        student_id       TEXT NOT NULL,
        course_id        TEXT NOT NULL,
        lecture_id       TEXT NOT NULL,
        concept_id       TEXT,
        kind             TEXT NOT NULL,
        position         REAL,
        playback_speed   REAL,
        timestamp        TEXT NOT NULL,
        metadata         JSON,
        created_at       TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_student_lecture
        ON analytics_events(student_id, lecture_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_events_lecture
        ON analytics_events(lecture_id);
    CREATE INDEX IF NOT EXISTS idx_events_course
        ON analytics_events(course_id);
    "#,
];

/// Run any pending migrations on the connection.
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current >= SCHEMA_VERSION {
        tracing::debug!(version = current, "Schema up to date");
        return Ok(());
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version <= current {
            continue;
        }

        tracing::info!(version, "Applying schema migration");
        conn.execute_batch(migration)?;
        conn.pragma_update(None, "user_version", version)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_and_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        // Second run is a no-op
        run_migrations(&conn).unwrap();

        // Tables exist
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('lectures', 'concepts', 'student_lectures',
                              'rewind_events', 'analytics_events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);
    }
}
