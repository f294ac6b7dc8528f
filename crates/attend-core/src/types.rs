use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::matcher::MatchError;

/// Label reported when no gallery entry is close enough to the query.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Face embedding vector (128-dimensional for dlib-style encoders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Reject vectors that cannot take part in a distance computation.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.values.is_empty() {
            return Err(MatchError::EmptyEmbedding);
        }
        if let Some(index) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(MatchError::NonFinite { index });
        }
        Ok(())
    }

    /// Euclidean distance between two embeddings of the same dimensionality.
    ///
    /// Differing lengths are an error; the shorter vector is never
    /// zero-padded or the longer one truncated.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, MatchError> {
        if self.dim() != other.dim() {
            return Err(MatchError::DimensionMismatch {
                expected: self.dim(),
                actual: other.dim(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

/// One enrolled photo of a known person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: String,
    /// Identity label; several entries may carry the same label.
    pub label: String,
    pub embedding: Embedding,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest gallery entry, `None` for an empty gallery.
    pub nearest_distance: Option<f32>,
    /// `max(0, 1 - distance)` for a match, 0 otherwise.
    pub confidence: f32,
    /// ID of the matched gallery entry (if any).
    pub entry_id: Option<String>,
    /// Label of the matched gallery entry (if any).
    pub label: Option<String>,
}

impl MatchResult {
    pub fn unknown(nearest_distance: Option<f32>) -> Self {
        Self {
            matched: false,
            nearest_distance,
            confidence: 0.0,
            entry_id: None,
            label: None,
        }
    }

    pub fn label_or_unknown(&self) -> &str {
        self.label.as_deref().unwrap_or(UNKNOWN_LABEL)
    }

    /// Confidence on the 0–100 reporting scale, truncated toward zero.
    pub fn confidence_percent(&self) -> u32 {
        // Nudge before flooring so 0.58 does not report as 57.
        ((self.confidence as f64) * 100.0 + 1e-4).floor().clamp(0.0, 100.0) as u32
    }
}

/// Role of a registered user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Professor,
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Role::Student,
            "professor" => Role::Professor,
            _ => Role::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Professor => "professor",
            Role::Unknown => "unknown",
        }
    }
}

/// A resolved person. The core only looks at `id` and `role`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub role: Role,
}

/// A weekly class slot for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub subject_id: i64,
    pub subject_name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub weekday: Weekday,
    pub group_id: i64,
}

impl ScheduleSlot {
    /// Inclusive on both bounds.
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }

    pub fn subject(&self) -> SubjectRef {
        SubjectRef {
            id: self.subject_id,
            name: self.subject_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
        }
    }
}

/// An attendance mark. Unique per (student_id, subject_id, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: i64,
    pub subject_id: i64,
    pub date: NaiveDate,
    pub registered_at: NaiveTime,
    pub status: AttendanceStatus,
}
