//! Attendance eligibility decisions.
//!
//! The decider is a pure function of an [`AttendanceContext`], a
//! [`Calendar`] and a [`RecordLookup`]. It reports what should happen; the
//! caller performs the write.

use std::convert::Infallible;

use chrono::{NaiveDate, NaiveDateTime, Weekday};
use serde::Serialize;

use crate::calendar::{Calendar, GregorianCalendar};
use crate::types::{AttendanceRecord, AttendanceStatus, Identity, Role, ScheduleSlot, SubjectRef};

/// Everything needed to decide one recognition event, assembled by the caller.
#[derive(Debug, Clone)]
pub struct AttendanceContext {
    pub identity: Identity,
    pub now: NaiveDateTime,
    /// Weekly schedule of the student's group (all weekdays).
    pub schedule: Vec<ScheduleSlot>,
}

/// Existence check for (student, subject, date) attendance records.
pub trait RecordLookup {
    type Error;

    fn record_exists(
        &self,
        student_id: i64,
        subject_id: i64,
        date: NaiveDate,
    ) -> Result<bool, Self::Error>;
}

impl<F> RecordLookup for F
where
    F: Fn(i64, i64, NaiveDate) -> bool,
{
    type Error = Infallible;

    fn record_exists(
        &self,
        student_id: i64,
        subject_id: i64,
        date: NaiveDate,
    ) -> Result<bool, Infallible> {
        Ok(self(student_id, subject_id, date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// No record exists yet; `record` should be written.
    Registered {
        subject: SubjectRef,
        record: AttendanceRecord,
    },
    AlreadyRegistered { subject: SubjectRef },
    NoActiveSession,
    NotAStudent,
}

impl Outcome {
    pub fn subject_id(&self) -> Option<i64> {
        match self {
            Outcome::Registered { subject, .. } | Outcome::AlreadyRegistered { subject } => {
                Some(subject.id)
            }
            Outcome::NoActiveSession | Outcome::NotAStudent => None,
        }
    }
}

pub struct Decider<C = GregorianCalendar> {
    calendar: C,
}

impl Default for Decider<GregorianCalendar> {
    fn default() -> Self {
        Self::new(GregorianCalendar)
    }
}

impl<C: Calendar> Decider<C> {
    pub fn new(calendar: C) -> Self {
        Self { calendar }
    }

    pub fn decide<L: RecordLookup>(
        &self,
        ctx: &AttendanceContext,
        lookup: &L,
    ) -> Result<Outcome, L::Error> {
        if ctx.identity.role != Role::Student {
            tracing::debug!(
                identity = ctx.identity.id,
                role = ctx.identity.role.as_str(),
                "not a student; skipping schedule"
            );
            return Ok(Outcome::NotAStudent);
        }

        let date = ctx.now.date();
        let Some(weekday) = self.calendar.day_of_week(date) else {
            tracing::debug!(%date, "no classes on this date");
            return Ok(Outcome::NoActiveSession);
        };

        let Some(slot) = active_session(&ctx.schedule, weekday, ctx.now) else {
            return Ok(Outcome::NoActiveSession);
        };
        let subject = slot.subject();

        if lookup.record_exists(ctx.identity.id, subject.id, date)? {
            tracing::debug!(
                student = ctx.identity.id,
                subject = subject.id,
                %date,
                "attendance already recorded"
            );
            return Ok(Outcome::AlreadyRegistered { subject });
        }

        let record = AttendanceRecord {
            student_id: ctx.identity.id,
            subject_id: subject.id,
            date,
            registered_at: ctx.now.time(),
            status: AttendanceStatus::Present,
        };
        Ok(Outcome::Registered { subject, record })
    }
}

/// The slot on `weekday` whose `[start, end]` contains `now`'s time of day.
///
/// Overlapping slots are resolved by earliest start, then lowest subject id,
/// then schedule order.
pub fn active_session(
    schedule: &[ScheduleSlot],
    weekday: Weekday,
    now: NaiveDateTime,
) -> Option<&ScheduleSlot> {
    let time = now.time();
    let mut candidates = schedule
        .iter()
        .filter(|slot| slot.weekday == weekday && slot.contains(time));

    let first = candidates.next()?;
    let mut overlapping = 1usize;
    let mut chosen = first;
    for slot in candidates {
        overlapping += 1;
        if (slot.start, slot.subject_id) < (chosen.start, chosen.subject_id) {
            chosen = slot;
        }
    }

    if overlapping > 1 {
        tracing::warn!(
            overlapping,
            chosen = chosen.subject_id,
            group = chosen.group_id,
            %time,
            "overlapping schedule slots; picked earliest start"
        );
    }

    Some(chosen)
}
