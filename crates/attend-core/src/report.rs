//! Attendance listings for the professor reporting path.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::types::AttendanceStatus;

/// One stored attendance mark joined with the student's name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRow {
    pub record_id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub date: NaiveDate,
    pub registered_at: NaiveTime,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSummary {
    pub total: usize,
    pub present: usize,
    /// Share of `present` in `total`, 0 when there are no rows.
    pub percent: f64,
}

impl AttendanceSummary {
    pub fn from_rows(rows: &[AttendanceRow]) -> Self {
        let total = rows.len();
        let present = rows
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .count();
        let percent = if total > 0 {
            present as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total,
            present,
            percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_empty() {
        let summary = AttendanceSummary::from_rows(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.percent, 0.0);
    }

    #[test]
    fn test_summary_counts_present() {
        let row = |id: i64| AttendanceRow {
            record_id: id,
            student_id: id,
            student_name: format!("student {id}"),
            date: NaiveDate::from_ymd_opt(2024, 10, 15).unwrap(),
            registered_at: NaiveTime::from_hms_opt(9, 5, 0).unwrap(),
            status: AttendanceStatus::Present,
        };
        let summary = AttendanceSummary::from_rows(&[row(1), row(2)]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.present, 2);
        assert!((summary.percent - 100.0).abs() < 1e-9);
    }
}
