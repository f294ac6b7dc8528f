//! Reference data import from TOML.
//!
//! ```toml
//! [[users]]
//! name = "Ana López"
//! email = "2109001@upy.edu.mx"
//! role = "student"
//! group = "ITI-5A"
//!
//! [[users]]
//! name = "Dr. Pérez"
//! email = "perez@upy.edu.mx"
//! role = "professor"
//!
//! [[schedule]]
//! group = "ITI-5A"
//! subject = "Math"
//! professor = "Dr. Pérez"
//! day = "tue"
//! start = "09:00"
//! end = "10:00"
//!
//! [[calendar]]
//! date = "2024-11-18"          # no `day`: no classes
//!
//! [[calendar]]
//! date = "2024-11-23"
//! day = "mon"                  # follow Monday's schedule
//! ```
//!
//! Groups and subjects referenced by name are created on demand. The whole
//! file is applied in one transaction.

use std::path::Path;

use attend_core::Role;
use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("reading reference data: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing reference data: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, Deserialize)]
pub struct ReferenceData {
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub subjects: Vec<SubjectSpec>,
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub schedule: Vec<SlotSpec>,
    #[serde(default)]
    pub calendar: Vec<CalendarSpec>,
}

#[derive(Debug, Deserialize)]
pub struct GroupSpec {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SubjectSpec {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UserSpec {
    pub name: String,
    pub email: String,
    pub role: String,
    /// Required for students.
    #[serde(default)]
    pub group: Option<String>,
    /// Defaults to the local part of `email`.
    #[serde(default)]
    pub enrollment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SlotSpec {
    pub group: String,
    pub subject: String,
    #[serde(default)]
    pub professor: Option<String>,
    pub day: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub struct CalendarSpec {
    pub date: String,
    #[serde(default)]
    pub day: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub groups: usize,
    pub subjects: usize,
    pub users: usize,
    pub slots: usize,
    pub calendar_days: usize,
}

impl ReferenceData {
    pub fn from_path(path: &Path) -> Result<Self, ImportError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(raw: &str) -> Result<Self, ImportError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply(&self, store: &Store) -> Result<ImportSummary, ImportError> {
        let tx = store.begin()?;
        let mut summary = ImportSummary::default();

        for group in &self.groups {
            store.ensure_group(&group.name)?;
            summary.groups += 1;
        }
        for subject in &self.subjects {
            store.ensure_subject(&subject.name)?;
            summary.subjects += 1;
        }

        for user in &self.users {
            let role = Role::parse(&user.role);
            if role == Role::Unknown {
                return Err(invalid(
                    format!("users.{}.role", user.name),
                    format!("expected student or professor, got {:?}", user.role),
                ));
            }
            let user_id = store.add_user(&user.name, &user.email, role)?;
            if role == Role::Student {
                let group = user.group.as_deref().ok_or_else(|| {
                    invalid(format!("users.{}.group", user.name), "required for students")
                })?;
                let enrollment = user.enrollment.clone().unwrap_or_else(|| {
                    user.email
                        .split_once('@')
                        .map_or(user.email.as_str(), |(local, _)| local)
                        .to_string()
                });
                let (group_id, _) = store.ensure_group(group)?;
                store.enroll_student(user_id, &enrollment, group_id)?;
            }
            summary.users += 1;
        }

        for (i, slot) in self.schedule.iter().enumerate() {
            let field = |name: &str| format!("schedule[{i}].{name}");
            let weekday = parse_weekday(&slot.day).ok_or_else(|| {
                invalid(field("day"), format!("not a weekday: {:?}", slot.day))
            })?;
            let start = parse_clock(&slot.start)
                .ok_or_else(|| invalid(field("start"), format!("not a time: {:?}", slot.start)))?;
            let end = parse_clock(&slot.end)
                .ok_or_else(|| invalid(field("end"), format!("not a time: {:?}", slot.end)))?;
            let professor_id = match &slot.professor {
                Some(name) => Some(
                    store
                        .identity_by_label(name)?
                        .filter(|identity| identity.role == Role::Professor)
                        .ok_or_else(|| {
                            invalid(field("professor"), format!("no professor named {name:?}"))
                        })?
                        .id,
                ),
                None => None,
            };
            let (group_id, _) = store.ensure_group(&slot.group)?;
            let subject_id = store.ensure_subject(&slot.subject)?;
            store.add_schedule_slot(group_id, subject_id, professor_id, weekday, start, end)?;
            summary.slots += 1;
        }

        for (i, day) in self.calendar.iter().enumerate() {
            let date = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d").map_err(|e| {
                invalid(format!("calendar[{i}].date"), format!("{:?}: {e}", day.date))
            })?;
            let weekday = match &day.day {
                Some(raw) => Some(parse_weekday(raw).ok_or_else(|| {
                    invalid(format!("calendar[{i}].day"), format!("not a weekday: {raw:?}"))
                })?),
                None => None,
            };
            store.set_calendar_day(date, weekday)?;
            summary.calendar_days += 1;
        }

        tx.commit().map_err(StoreError::from)?;
        tracing::info!(?summary, "reference data imported");
        Ok(summary)
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ImportError {
    ImportError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Accepts `mon`, `Monday`, `TUE`, ...
pub fn parse_weekday(raw: &str) -> Option<Weekday> {
    raw.trim().parse().ok()
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[subjects]]
name = "Math"

[[users]]
name = "Ana"
email = "2109001@upy.edu.mx"
role = "student"
group = "ITI-5A"

[[users]]
name = "Dr. Pérez"
email = "perez@upy.edu.mx"
role = "professor"

[[schedule]]
group = "ITI-5A"
subject = "Math"
professor = "Dr. Pérez"
day = "tue"
start = "09:00"
end = "10:00"

[[schedule]]
group = "ITI-5A"
subject = "Physics"
day = "Wednesday"
start = "11:00:00"
end = "12:30"

[[calendar]]
date = "2024-11-18"

[[calendar]]
date = "2024-11-23"
day = "mon"
"#;

    #[test]
    fn test_import_sample() {
        let store = Store::open_in_memory().unwrap();
        let summary = ReferenceData::parse(SAMPLE).unwrap().apply(&store).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                groups: 0,
                subjects: 1,
                users: 2,
                slots: 2,
                calendar_days: 2,
            }
        );

        let ana = store.identity_by_label("Ana").unwrap().unwrap();
        let group = store.student_group(ana.id).unwrap().unwrap();
        let weekly = store.weekly_schedule(group).unwrap();
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].weekday, Weekday::Tue);
        assert_eq!(weekly[1].subject_name, "Physics");
        assert_eq!(weekly[1].end, NaiveTime::from_hms_opt(12, 30, 0).unwrap());

        let professor = store.identity_by_label("Dr. Pérez").unwrap().unwrap();
        assert_eq!(store.classes_by_professor(professor.id).unwrap().len(), 1);
    }

    #[test]
    fn test_import_is_all_or_nothing() {
        let store = Store::open_in_memory().unwrap();
        let broken = r#"
[[users]]
name = "Ana"
email = "2109001@upy.edu.mx"
role = "student"
group = "ITI-5A"

[[schedule]]
group = "ITI-5A"
subject = "Math"
day = "someday"
start = "09:00"
end = "10:00"
"#;
        let err = ReferenceData::parse(broken).unwrap().apply(&store).unwrap_err();
        assert!(matches!(err, ImportError::Invalid { ref field, .. } if field == "schedule[0].day"));
        assert!(store.identity_by_label("Ana").unwrap().is_none());
    }

    #[test]
    fn test_student_requires_group() {
        let store = Store::open_in_memory().unwrap();
        let data = ReferenceData::parse(
            r#"
[[users]]
name = "Ana"
email = "2109001@upy.edu.mx"
role = "student"
"#,
        )
        .unwrap();
        assert!(matches!(
            data.apply(&store),
            Err(ImportError::Invalid { .. })
        ));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_weekday("Tue"), Some(Weekday::Tue));
        assert_eq!(parse_weekday("friday"), Some(Weekday::Fri));
        assert_eq!(parse_weekday("x"), None);
        assert_eq!(parse_clock("9:05"), NaiveTime::from_hms_opt(9, 5, 0));
        assert_eq!(parse_clock("25:00"), None);
    }
}
