//! SQLite store for reference data and attendance records.
//!
//! A [`Store`] owns one connection and is meant to live on a single thread;
//! callers that need concurrency put it behind an engine thread.

use std::path::Path;

use attend_core::report::AttendanceRow;
use attend_core::{
    AttendanceRecord, AttendanceStatus, CalendarOverrides, Identity, RecordLookup, Role,
    ScheduleSlot,
};
use chrono::{NaiveDate, NaiveTime, Weekday};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;

use crate::schema;

pub use rusqlite::Error as SqliteError;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("attendance already stored for student {student_id}, subject {subject_id} on {date}")]
    Conflict {
        student_id: i64,
        subject_id: i64,
        date: NaiveDate,
    },
    #[error("user already exists: {name} <{email}>")]
    UserExists { name: String, email: String },
    #[error("not an institutional e-mail address for @{domain}: {email}")]
    InvalidEmail { email: String, domain: String },
    #[error("schedule slot ends before it starts: {start} > {end}")]
    InvalidSlot { start: NaiveTime, end: NaiveTime },
    #[error("database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of registering a new student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredStudent {
    pub user_id: i64,
    pub enrollment: String,
    pub group_id: i64,
    pub group_created: bool,
}

/// A subject a professor teaches to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfessorClass {
    pub subject_id: i64,
    pub subject_name: String,
    pub group_id: i64,
    pub group_name: String,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Start a transaction; store methods called before `commit` join it.
    /// Dropping it without committing rolls back.
    pub fn begin(&self) -> Result<rusqlite::Transaction<'_>, StoreError> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // --- reference data -------------------------------------------------

    pub fn add_user(&self, name: &str, email: &str, role: Role) -> Result<i64, StoreError> {
        if self.user_exists(name, email)? {
            return Err(StoreError::UserExists {
                name: name.to_string(),
                email: email.to_string(),
            });
        }
        self.conn.execute(
            "INSERT INTO users (name, email, role) VALUES (?1, ?2, ?3)",
            params![name, email, role.as_str()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn user_exists(&self, name: &str, email: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM users WHERE name = ?1 AND email = ?2",
                params![name, email],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn group_id(&self, name: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM class_groups WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Return the group's id, creating it when missing. The flag is true
    /// when a new group was created.
    pub fn ensure_group(&self, name: &str) -> Result<(i64, bool), StoreError> {
        if let Some(id) = self.group_id(name)? {
            return Ok((id, false));
        }
        self.conn
            .execute("INSERT INTO class_groups (name) VALUES (?1)", params![name])?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(group = name, id, "group created");
        Ok((id, true))
    }

    pub fn ensure_subject(&self, name: &str) -> Result<i64, StoreError> {
        let existing = self
            .conn
            .query_row(
                "SELECT id FROM subjects WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn
            .execute("INSERT INTO subjects (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn enroll_student(
        &self,
        user_id: i64,
        enrollment: &str,
        group_id: i64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO students (user_id, enrollment, group_id) VALUES (?1, ?2, ?3)",
            params![user_id, enrollment, group_id],
        )?;
        Ok(())
    }

    /// Register a new student from an institutional e-mail address.
    ///
    /// The enrollment number is the numeric local part of `<digits>@<domain>`.
    /// The group is created when it does not exist yet.
    pub fn register_student(
        &self,
        name: &str,
        email: &str,
        group: &str,
        domain: &str,
    ) -> Result<RegisteredStudent, StoreError> {
        if self.user_exists(name, email)? {
            return Err(StoreError::UserExists {
                name: name.to_string(),
                email: email.to_string(),
            });
        }
        let enrollment =
            enrollment_from_email(email, domain).ok_or_else(|| StoreError::InvalidEmail {
                email: email.to_string(),
                domain: domain.to_string(),
            })?;

        let tx = self.begin()?;
        let user_id = self.add_user(name, email, Role::Student)?;
        let (group_id, group_created) = self.ensure_group(group)?;
        self.enroll_student(user_id, &enrollment, group_id)?;
        tx.commit()?;

        tracing::info!(user_id, group_id, enrollment = %enrollment, "student registered");
        Ok(RegisteredStudent {
            user_id,
            enrollment,
            group_id,
            group_created,
        })
    }

    pub fn add_schedule_slot(
        &self,
        group_id: i64,
        subject_id: i64,
        professor_id: Option<i64>,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<i64, StoreError> {
        if start > end {
            return Err(StoreError::InvalidSlot { start, end });
        }
        self.conn.execute(
            "INSERT INTO schedule (group_id, subject_id, professor_id, weekday, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                group_id,
                subject_id,
                professor_id,
                weekday.num_days_from_monday(),
                start.format(TIME_FORMAT).to_string(),
                end.format(TIME_FORMAT).to_string(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Override the schedule weekday for `date`; `None` cancels classes.
    pub fn set_calendar_day(
        &self,
        date: NaiveDate,
        weekday: Option<Weekday>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO calendar_days (date, weekday) VALUES (?1, ?2)
             ON CONFLICT(date) DO UPDATE SET weekday = excluded.weekday",
            params![
                date.format(DATE_FORMAT).to_string(),
                weekday.map(|w| w.num_days_from_monday()),
            ],
        )?;
        Ok(())
    }

    // --- identity resolution --------------------------------------------

    /// Resolve a gallery label to a user. Duplicate names resolve to the
    /// lowest user id.
    pub fn identity_by_label(&self, label: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, role FROM users WHERE name = ?1 ORDER BY id LIMIT 1",
                params![label],
                identity_from_row,
            )
            .optional()?)
    }

    pub fn identity_by_credentials(
        &self,
        name: &str,
        email: &str,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, role FROM users WHERE name = ?1 AND email = ?2",
                params![name, email],
                identity_from_row,
            )
            .optional()?)
    }

    pub fn student_group(&self, user_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT group_id FROM students WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    // --- schedule & calendar --------------------------------------------

    /// All slots of a group, ordered by weekday, start time and subject.
    pub fn weekly_schedule(&self, group_id: i64) -> Result<Vec<ScheduleSlot>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.subject_id, m.name, s.start_time, s.end_time, s.weekday, s.group_id
             FROM schedule s JOIN subjects m ON m.id = s.subject_id
             WHERE s.group_id = ?1
             ORDER BY s.weekday, s.start_time, s.subject_id",
        )?;
        let slots = stmt
            .query_map(params![group_id], slot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(slots)
    }

    pub fn schedule_for_day(
        &self,
        group_id: i64,
        weekday: Weekday,
    ) -> Result<Vec<ScheduleSlot>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.subject_id, m.name, s.start_time, s.end_time, s.weekday, s.group_id
             FROM schedule s JOIN subjects m ON m.id = s.subject_id
             WHERE s.group_id = ?1 AND s.weekday = ?2
             ORDER BY s.start_time, s.subject_id",
        )?;
        let slots = stmt
            .query_map(
                params![group_id, weekday.num_days_from_monday()],
                slot_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(slots)
    }

    /// Calendar with the stored override for `date`, if any.
    pub fn calendar_for(&self, date: NaiveDate) -> Result<CalendarOverrides, StoreError> {
        let stored: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT weekday FROM calendar_days WHERE date = ?1",
                params![date.format(DATE_FORMAT).to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let mut calendar = CalendarOverrides::new();
        if let Some(weekday) = stored {
            let weekday = match weekday {
                Some(n) => Some(weekday_from_index(n).ok_or_else(|| {
                    conversion_error(0, Type::Integer, format!("weekday out of range: {n}"))
                })?),
                None => None,
            };
            calendar.insert(date, weekday);
        }
        Ok(calendar)
    }

    // --- attendance -----------------------------------------------------

    pub fn record_exists(
        &self,
        student_id: i64,
        subject_id: i64,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM attendance WHERE student_id = ?1 AND subject_id = ?2 AND date = ?3",
                params![student_id, subject_id, date.format(DATE_FORMAT).to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert an attendance record. A duplicate (student, subject, date)
    /// fails with [`StoreError::Conflict`].
    pub fn insert_record(&self, record: &AttendanceRecord) -> Result<i64, StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO attendance (student_id, subject_id, date, registered_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.student_id,
                record.subject_id,
                record.date.format(DATE_FORMAT).to_string(),
                record.registered_at.format(TIME_FORMAT).to_string(),
                record.status.as_str(),
            ],
        );

        match inserted {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                tracing::warn!(
                    student = record.student_id,
                    subject = record.subject_id,
                    date = %record.date,
                    "attendance insert lost to an existing record"
                );
                Err(StoreError::Conflict {
                    student_id: record.student_id,
                    subject_id: record.subject_id,
                    date: record.date,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    // --- reporting ------------------------------------------------------

    pub fn classes_by_professor(
        &self,
        professor_id: i64,
    ) -> Result<Vec<ProfessorClass>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT s.subject_id, m.name, s.group_id, g.name
             FROM schedule s
             JOIN subjects m ON m.id = s.subject_id
             JOIN class_groups g ON g.id = s.group_id
             WHERE s.professor_id = ?1
             ORDER BY m.name, g.name",
        )?;
        let classes = stmt
            .query_map(params![professor_id], |row| {
                Ok(ProfessorClass {
                    subject_id: row.get(0)?,
                    subject_name: row.get(1)?,
                    group_id: row.get(2)?,
                    group_name: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(classes)
    }

    /// Attendance marks for a subject between two dates, both inclusive.
    pub fn attendance_between(
        &self,
        subject_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.student_id, u.name, a.date, a.registered_at, a.status
             FROM attendance a JOIN users u ON u.id = a.student_id
             WHERE a.subject_id = ?1 AND a.date BETWEEN ?2 AND ?3
             ORDER BY a.date, a.registered_at, a.id",
        )?;
        let rows = stmt
            .query_map(
                params![
                    subject_id,
                    from.format(DATE_FORMAT).to_string(),
                    to.format(DATE_FORMAT).to_string(),
                ],
                |row| {
                    Ok(AttendanceRow {
                        record_id: row.get(0)?,
                        student_id: row.get(1)?,
                        student_name: row.get(2)?,
                        date: date_col(row, 3)?,
                        registered_at: time_col(row, 4)?,
                        status: status_col(row, 5)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl RecordLookup for Store {
    type Error = StoreError;

    fn record_exists(
        &self,
        student_id: i64,
        subject_id: i64,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        Store::record_exists(self, student_id, subject_id, date)
    }
}

/// `<digits>@<domain>` → `<digits>`.
fn enrollment_from_email(email: &str, domain: &str) -> Option<String> {
    let (local, host) = email.trim().split_once('@')?;
    if local.is_empty() || !local.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !host.eq_ignore_ascii_case(domain) {
        return None;
    }
    Some(local.to_string())
}

pub(crate) fn weekday_from_index(n: i64) -> Option<Weekday> {
    match n {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    let role: String = row.get(2)?;
    Ok(Identity {
        id: row.get(0)?,
        name: row.get(1)?,
        role: Role::parse(&role),
    })
}

fn slot_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleSlot> {
    let weekday: i64 = row.get(4)?;
    Ok(ScheduleSlot {
        subject_id: row.get(0)?,
        subject_name: row.get(1)?,
        start: time_col(row, 2)?,
        end: time_col(row, 3)?,
        weekday: weekday_from_index(weekday).ok_or_else(|| {
            conversion_error(4, Type::Integer, format!("weekday out of range: {weekday}"))
        })?,
        group_id: row.get(5)?,
    })
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, TIME_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn status_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<AttendanceStatus> {
    let raw: String = row.get(idx)?;
    match raw.as_str() {
        "present" => Ok(AttendanceStatus::Present),
        other => Err(conversion_error(
            idx,
            Type::Text,
            format!("unknown attendance status: {other}"),
        )),
    }
}
