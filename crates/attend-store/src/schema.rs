use rusqlite::Connection;

/// Idempotent schema creation.
///
/// Weekdays are stored as 0 = Monday .. 6 = Sunday, dates as `YYYY-MM-DD`
/// and times of day as `HH:MM:SS`. A `calendar_days` row with a NULL
/// weekday marks a date without classes.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT NOT NULL,
    email TEXT NOT NULL,
    role  TEXT NOT NULL,
    UNIQUE (name, email)
);

CREATE TABLE IF NOT EXISTS class_groups (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS students (
    user_id    INTEGER PRIMARY KEY REFERENCES users(id),
    enrollment TEXT NOT NULL,
    group_id   INTEGER NOT NULL REFERENCES class_groups(id)
);

CREATE TABLE IF NOT EXISTS subjects (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS schedule (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id     INTEGER NOT NULL REFERENCES class_groups(id),
    subject_id   INTEGER NOT NULL REFERENCES subjects(id),
    professor_id INTEGER REFERENCES users(id),
    weekday      INTEGER NOT NULL CHECK (weekday BETWEEN 0 AND 6),
    start_time   TEXT NOT NULL,
    end_time     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS schedule_group_weekday ON schedule (group_id, weekday);

CREATE TABLE IF NOT EXISTS calendar_days (
    date    TEXT PRIMARY KEY,
    weekday INTEGER CHECK (weekday IS NULL OR weekday BETWEEN 0 AND 6)
);

CREATE TABLE IF NOT EXISTS attendance (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id    INTEGER NOT NULL REFERENCES users(id),
    subject_id    INTEGER NOT NULL REFERENCES subjects(id),
    date          TEXT NOT NULL,
    registered_at TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'present',
    UNIQUE (student_id, subject_id, date)
);
";

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
