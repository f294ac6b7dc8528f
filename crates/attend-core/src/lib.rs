//! attend-core — Identity matching and attendance eligibility engine.
//!
//! Matches a face embedding against an immutable gallery snapshot and
//! decides whether the recognized identity earns an attendance mark for
//! the class session running at that moment. Nothing here performs I/O:
//! embedding extraction, reference data and persistence are supplied by
//! the caller.

pub mod calendar;
pub mod decider;
pub mod gallery;
pub mod matcher;
pub mod report;
pub mod source;
pub mod types;
pub mod verdict;

pub use calendar::{Calendar, CalendarOverrides, GregorianCalendar};
pub use decider::{AttendanceContext, Decider, Outcome, RecordLookup};
pub use gallery::{Gallery, GalleryHandle};
pub use matcher::{EuclideanMatcher, MatchError, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use report::{AttendanceRow, AttendanceSummary};
pub use source::{EmbeddingSource, ExtractError};
pub use types::{
    AttendanceRecord, AttendanceStatus, Embedding, GalleryEntry, Identity, MatchResult, Role,
    ScheduleSlot, SubjectRef,
};
pub use verdict::Verdict;
