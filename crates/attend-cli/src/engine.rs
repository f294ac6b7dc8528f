use std::sync::Arc;
use std::time::{Duration, Instant};

use attend_core::{
    AttendanceContext, CalendarOverrides, Decider, Embedding, EuclideanMatcher, ExtractError,
    Gallery, GalleryEntry, GalleryHandle, MatchError, Outcome, Role, SubjectRef, Verdict,
};
use attend_store::{GalleryFileError, Store, StoreError};
use chrono::NaiveDateTime;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("gallery file error: {0}")]
    GalleryFile(#[from] GalleryFileError),
    #[error("invalid gallery: {0}")]
    InvalidGallery(#[from] MatchError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Decide {
        label: String,
        confidence: u32,
        now: NaiveDateTime,
        deadline: Instant,
        reply: oneshot::Sender<Result<Verdict, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread and the shared gallery snapshot.
///
/// Matching runs on the caller's task against an `Arc` snapshot; only
/// identity resolution, the decision and the write go through the engine
/// thread, which owns the database connection.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    gallery: Arc<GalleryHandle>,
    threshold: f32,
    budget: Duration,
}

impl EngineHandle {
    /// Same engine, different per-request time budget.
    #[cfg(test)]
    pub fn with_budget(&self, budget: Duration) -> Self {
        Self {
            budget,
            ..self.clone()
        }
    }

    #[cfg(test)]
    pub fn gallery(&self) -> Arc<Gallery> {
        self.gallery.snapshot()
    }

    /// Install a new gallery snapshot. Requests already matching keep the
    /// previous one.
    pub fn replace_gallery(&self, entries: Vec<GalleryEntry>) -> Result<Arc<Gallery>, EngineError> {
        Ok(self.gallery.replace(entries)?)
    }

    /// Run one recognition request: match the faces found in a photograph,
    /// then decide and record attendance for the recognized identity.
    pub async fn mark(
        &self,
        faces: Result<Vec<Embedding>, ExtractError>,
        now: NaiveDateTime,
    ) -> Result<Verdict, EngineError> {
        let deadline = Instant::now() + self.budget;

        let faces = match faces {
            Ok(faces) if !faces.is_empty() => faces,
            Ok(_) | Err(ExtractError::NoFaceDetected) => return Ok(Verdict::NoFaceDetected),
            Err(ExtractError::Malformed(reason)) => {
                return Ok(Verdict::InvalidEmbedding { reason })
            }
        };

        let snapshot = self.gallery.snapshot();
        let result = match snapshot.compare(&EuclideanMatcher, &faces, self.threshold) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, gallery_version = snapshot.version(), "match rejected");
                return Ok(Verdict::invalid_embedding(&err));
            }
        };

        let Some(label) = result.label.clone() else {
            tracing::info!(
                distance = ?result.nearest_distance,
                gallery_version = snapshot.version(),
                "no gallery entry within threshold"
            );
            return Ok(Verdict::Unrecognized);
        };

        tracing::info!(
            label = %label,
            confidence = result.confidence_percent(),
            gallery_version = snapshot.version(),
            "identity recognized"
        );

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Decide {
                label,
                confidence: result.confidence_percent(),
                now,
                deadline,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Open the store and gallery from `config` and spawn the engine.
///
/// Fails fast if either is unavailable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let store = Store::open(&config.db_path)?;
    let gallery = Gallery::new(attend_store::load_gallery(&config.gallery_path)?)?;
    tracing::info!(
        entries = gallery.len(),
        dim = ?gallery.dim(),
        fingerprint = gallery.fingerprint(),
        "gallery snapshot loaded"
    );
    spawn_engine_with(store, gallery, config.match_threshold, config.request_budget)
}

/// Spawn the engine on a dedicated OS thread that owns `store`.
pub fn spawn_engine_with(
    store: Store,
    gallery: Gallery,
    threshold: f32,
    budget: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("attend-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Decide {
                        label,
                        confidence,
                        now,
                        deadline,
                        reply,
                    } => {
                        let result = run_decide(&store, &label, confidence, now, deadline);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        gallery: Arc::new(GalleryHandle::new(gallery)),
        threshold,
        budget,
    })
}

/// Resolve the identity, assemble its context, decide, and write at most once.
fn run_decide(
    store: &Store,
    label: &str,
    confidence: u32,
    now: NaiveDateTime,
    deadline: Instant,
) -> Result<Verdict, EngineError> {
    if Instant::now() >= deadline {
        tracing::warn!(label, "request budget exhausted before decision");
        return Ok(Verdict::TimedOut);
    }

    let Some(identity) = store.identity_by_label(label)? else {
        tracing::warn!(label, "recognized label has no registered user");
        return Ok(Verdict::UnknownIdentity {
            label: label.to_string(),
        });
    };

    // Only students need a schedule and a calendar; everyone else is
    // decided without touching reference data.
    let (schedule, calendar) = match identity.role {
        Role::Student => {
            let schedule = match store.student_group(identity.id)? {
                Some(group_id) => store.weekly_schedule(group_id)?,
                None => {
                    tracing::warn!(student = identity.id, "student has no group");
                    Vec::new()
                }
            };
            (schedule, store.calendar_for(now.date())?)
        }
        Role::Professor | Role::Unknown => (Vec::new(), CalendarOverrides::new()),
    };

    let name = identity.name.clone();
    let ctx = AttendanceContext {
        identity,
        now,
        schedule,
    };

    match Decider::new(calendar).decide(&ctx, store)? {
        Outcome::Registered { subject, record } => {
            if Instant::now() >= deadline {
                tracing::warn!(label, subject = subject.id, "request budget exhausted before write");
                return Ok(Verdict::TimedOut);
            }
            registration_verdict(store.insert_record(&record), name, subject, confidence)
        }
        Outcome::AlreadyRegistered { subject } => Ok(Verdict::AlreadyRegistered {
            name,
            subject,
            confidence,
        }),
        Outcome::NoActiveSession => Ok(Verdict::NoActiveSession { name }),
        Outcome::NotAStudent => Ok(Verdict::NotAStudent { name }),
    }
}

/// A lost unique-key race reads as a duplicate; other store failures
/// propagate and are not retried.
fn registration_verdict(
    inserted: Result<i64, StoreError>,
    name: String,
    subject: SubjectRef,
    confidence: u32,
) -> Result<Verdict, EngineError> {
    match inserted {
        Ok(record_id) => {
            tracing::info!(record_id, subject = subject.id, "attendance registered");
            Ok(Verdict::Registered {
                name,
                subject,
                confidence,
                record_id,
            })
        }
        Err(StoreError::Conflict { .. }) => Ok(Verdict::AlreadyRegistered {
            name,
            subject,
            confidence,
        }),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, Weekday};

    // 2024-10-15 is a Tuesday.
    fn tuesday_at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 15)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn entry(label: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            id: format!("{label}-1"),
            label: label.into(),
            embedding: Embedding::new(values),
        }
    }

    fn engine() -> EngineHandle {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        spawn_engine_with(store, gallery(), 0.6, Duration::from_secs(5)).unwrap()
    }

    fn seed(store: &Store) {
        let ana = store
            .register_student("Ana", "2109001@upy.edu.mx", "ITI-5A", "upy.edu.mx")
            .unwrap();
        store
            .add_user("Luis", "perez@upy.edu.mx", Role::Professor)
            .unwrap();
        let math = store.ensure_subject("Math").unwrap();
        store
            .add_schedule_slot(
                ana.group_id,
                math,
                None,
                Weekday::Tue,
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            )
            .unwrap();
    }

    fn gallery() -> Gallery {
        Gallery::new(vec![
            entry("Ana", vec![0.0, 0.42]),
            entry("Luis", vec![0.81, 0.0]),
            entry("Ghost", vec![-0.9, 0.0]),
        ])
        .unwrap()
    }

    fn ana_face() -> Result<Vec<Embedding>, ExtractError> {
        Ok(vec![Embedding::new(vec![0.0, 0.0])])
    }

    #[tokio::test]
    async fn test_mark_then_duplicate() {
        let engine = engine();

        let first = engine.mark(ana_face(), tuesday_at(9, 30)).await.unwrap();
        assert!(
            matches!(first, Verdict::Registered { ref subject, confidence: 58, .. } if subject.name == "Math"),
            "got {first:?}"
        );

        let second = engine.mark(ana_face(), tuesday_at(9, 45)).await.unwrap();
        assert!(matches!(second, Verdict::AlreadyRegistered { .. }), "got {second:?}");
    }

    #[tokio::test]
    async fn test_concurrent_marks_write_once() {
        let engine = engine();
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let engine = engine.clone();
            tasks.spawn(async move { engine.mark(ana_face(), tuesday_at(9, 30)).await });
        }

        let mut registered = 0;
        let mut duplicates = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap().unwrap() {
                Verdict::Registered { .. } => registered += 1,
                Verdict::AlreadyRegistered { .. } => duplicates += 1,
                other => panic!("unexpected verdict {other:?}"),
            }
        }
        assert_eq!(registered, 1);
        assert_eq!(duplicates, 7);
    }

    #[tokio::test]
    async fn test_out_of_session_and_roles() {
        let engine = engine();

        let late = engine.mark(ana_face(), tuesday_at(10, 1)).await.unwrap();
        assert_eq!(late, Verdict::NoActiveSession { name: "Ana".into() });

        let professor = engine
            .mark(Ok(vec![Embedding::new(vec![0.8, 0.0])]), tuesday_at(9, 30))
            .await
            .unwrap();
        assert_eq!(professor, Verdict::NotAStudent { name: "Luis".into() });

        let ghost = engine
            .mark(Ok(vec![Embedding::new(vec![-0.9, 0.0])]), tuesday_at(9, 30))
            .await
            .unwrap();
        assert_eq!(ghost, Verdict::UnknownIdentity { label: "Ghost".into() });
    }

    #[tokio::test]
    async fn test_request_boundary_verdicts() {
        let engine = engine();

        let none = engine.mark(Ok(vec![]), tuesday_at(9, 30)).await.unwrap();
        assert_eq!(none, Verdict::NoFaceDetected);

        let stranger = engine
            .mark(Ok(vec![Embedding::new(vec![5.0, 5.0])]), tuesday_at(9, 30))
            .await
            .unwrap();
        assert_eq!(stranger, Verdict::Unrecognized);

        let wrong_dim = engine
            .mark(Ok(vec![Embedding::new(vec![0.0, 0.0, 0.0])]), tuesday_at(9, 30))
            .await
            .unwrap();
        assert!(matches!(wrong_dim, Verdict::InvalidEmbedding { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_budget_writes_nothing() {
        let engine = engine();

        let timed_out = engine
            .with_budget(Duration::ZERO)
            .mark(ana_face(), tuesday_at(9, 30))
            .await
            .unwrap();
        assert_eq!(timed_out, Verdict::TimedOut);

        // Nothing was written, so a request within budget still registers.
        let retry = engine.mark(ana_face(), tuesday_at(9, 30)).await.unwrap();
        assert!(matches!(retry, Verdict::Registered { .. }), "got {retry:?}");
    }

    #[tokio::test]
    async fn test_replaced_gallery_is_used() {
        let engine = engine();
        engine
            .replace_gallery(vec![entry("Luis", vec![0.0, 0.0])])
            .unwrap();
        assert_eq!(engine.gallery().version(), 2);

        let verdict = engine.mark(ana_face(), tuesday_at(9, 30)).await.unwrap();
        assert_eq!(verdict, Verdict::NotAStudent { name: "Luis".into() });
    }

    #[tokio::test]
    async fn test_non_students_skip_calendar() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        let store = Store::open(&path).unwrap();
        seed(&store);

        // With the calendar gone, any calendar read fails the request.
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE calendar_days")
            .unwrap();

        let engine = spawn_engine_with(store, gallery(), 0.6, Duration::from_secs(5)).unwrap();

        let professor = engine
            .mark(Ok(vec![Embedding::new(vec![0.8, 0.0])]), tuesday_at(9, 30))
            .await
            .unwrap();
        assert_eq!(professor, Verdict::NotAStudent { name: "Luis".into() });

        let student = engine.mark(ana_face(), tuesday_at(9, 30)).await;
        assert!(matches!(student, Err(EngineError::Store(_))), "got {student:?}");
    }

    #[test]
    fn test_conflict_reads_as_duplicate() {
        let math = SubjectRef {
            id: 1,
            name: "Math".into(),
        };
        let conflict = Err(StoreError::Conflict {
            student_id: 1,
            subject_id: 1,
            date: NaiveDate::from_ymd_opt(2024, 10, 15).unwrap(),
        });
        let verdict = registration_verdict(conflict, "Ana".into(), math.clone(), 58).unwrap();
        assert_eq!(
            verdict,
            Verdict::AlreadyRegistered {
                name: "Ana".into(),
                subject: math.clone(),
                confidence: 58,
            }
        );

        let failure = Err(StoreError::Sqlite(rusqlite_error()));
        assert!(matches!(
            registration_verdict(failure, "Ana".into(), math, 58),
            Err(EngineError::Store(StoreError::Sqlite(_)))
        ));
    }

    fn rusqlite_error() -> attend_store::store::SqliteError {
        attend_store::store::SqliteError::QueryReturnedNoRows
    }
}
