//! Date → schedule weekday mapping.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Weekday};

/// Maps a calendar date to the weekday whose schedule applies on it.
///
/// `None` means no classes are held that day.
pub trait Calendar {
    fn day_of_week(&self, date: NaiveDate) -> Option<Weekday>;
}

/// Plain civil weekday.
#[derive(Debug, Clone, Copy, Default)]
pub struct GregorianCalendar;

impl Calendar for GregorianCalendar {
    fn day_of_week(&self, date: NaiveDate) -> Option<Weekday> {
        Some(date.weekday())
    }
}

/// Per-date overrides on top of the civil weekday, e.g. a holiday with no
/// classes or a makeup day that follows another weekday's schedule.
#[derive(Debug, Clone, Default)]
pub struct CalendarOverrides {
    days: BTreeMap<NaiveDate, Option<Weekday>>,
}

impl CalendarOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, date: NaiveDate, weekday: Option<Weekday>) {
        self.days.insert(date, weekday);
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl FromIterator<(NaiveDate, Option<Weekday>)> for CalendarOverrides {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, Option<Weekday>)>>(iter: I) -> Self {
        Self {
            days: iter.into_iter().collect(),
        }
    }
}

impl Calendar for CalendarOverrides {
    fn day_of_week(&self, date: NaiveDate) -> Option<Weekday> {
        match self.days.get(&date) {
            Some(mapped) => *mapped,
            None => GregorianCalendar.day_of_week(date),
        }
    }
}

impl<C: Calendar + ?Sized> Calendar for &C {
    fn day_of_week(&self, date: NaiveDate) -> Option<Weekday> {
        (**self).day_of_week(date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_gregorian_weekday() {
        assert_eq!(
            GregorianCalendar.day_of_week(date(2024, 10, 15)),
            Some(Weekday::Tue)
        );
    }

    #[test]
    fn test_overrides_remap_and_cancel() {
        let calendar: CalendarOverrides = [
            (date(2024, 11, 18), None),
            (date(2024, 11, 23), Some(Weekday::Mon)),
        ]
        .into_iter()
        .collect();

        assert_eq!(calendar.day_of_week(date(2024, 11, 18)), None);
        assert_eq!(calendar.day_of_week(date(2024, 11, 23)), Some(Weekday::Mon));
        // Not overridden: civil weekday.
        assert_eq!(calendar.day_of_week(date(2024, 11, 19)), Some(Weekday::Tue));
    }
}
