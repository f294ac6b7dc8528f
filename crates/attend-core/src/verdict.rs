//! Request-level result of one recognition event.
//!
//! Every way a request can end, informational or error, is a [`Verdict`]
//! with exactly one user-facing message.

use std::fmt;

use serde::Serialize;

use crate::matcher::MatchError;
use crate::types::SubjectRef;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Registered {
        name: String,
        subject: SubjectRef,
        confidence: u32,
        record_id: i64,
    },
    /// Also used when a concurrent writer won the unique-key race.
    AlreadyRegistered {
        name: String,
        subject: SubjectRef,
        confidence: u32,
    },
    NoActiveSession { name: String },
    NotAStudent { name: String },
    /// No gallery entry within the match threshold.
    Unrecognized,
    /// Matched a gallery label with no registered user behind it.
    UnknownIdentity { label: String },
    NoFaceDetected,
    InvalidEmbedding { reason: String },
    TimedOut,
}

impl Verdict {
    pub fn invalid_embedding(err: &MatchError) -> Self {
        Verdict::InvalidEmbedding {
            reason: err.to_string(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            Verdict::Registered {
                name,
                subject,
                confidence,
                ..
            } => format!(
                "{name} recognized ({confidence}%): attendance registered for {}",
                subject.name
            ),
            Verdict::AlreadyRegistered {
                name,
                subject,
                confidence,
            } => format!(
                "{name} recognized ({confidence}%): attendance for {} was already registered today",
                subject.name
            ),
            Verdict::NoActiveSession { name } => {
                format!("{name} has no class in session right now")
            }
            Verdict::NotAStudent { name } => {
                format!("{name} is not a student; attendance is only recorded for students")
            }
            Verdict::Unrecognized => "face not recognized; please try again".to_string(),
            Verdict::UnknownIdentity { label } => {
                format!("recognized '{label}' but no registered user has that name")
            }
            Verdict::NoFaceDetected => "no face detected; please try again".to_string(),
            Verdict::InvalidEmbedding { reason } => format!("request rejected: {reason}"),
            Verdict::TimedOut => {
                "request took too long and was not recorded; please try again".to_string()
            }
        }
    }

    /// True for verdicts that signal a failed request rather than a decision.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Verdict::InvalidEmbedding { .. } | Verdict::TimedOut | Verdict::NoFaceDetected
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}
