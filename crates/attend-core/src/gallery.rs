//! Immutable gallery snapshots.
//!
//! A [`Gallery`] is validated once when built and never changes afterwards.
//! [`GalleryHandle`] hands out `Arc` clones of the current snapshot; a reload
//! builds a complete new snapshot and swaps the pointer, so matches already
//! in flight finish against the version they started with.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

use crate::matcher::{MatchError, Matcher};
use crate::types::{Embedding, GalleryEntry, MatchResult};

#[derive(Debug)]
pub struct Gallery {
    version: u64,
    dim: Option<usize>,
    fingerprint: String,
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Build the first snapshot (version 1).
    pub fn new(entries: Vec<GalleryEntry>) -> Result<Self, MatchError> {
        Self::with_version(entries, 1)
    }

    fn with_version(entries: Vec<GalleryEntry>, version: u64) -> Result<Self, MatchError> {
        let mut dim = None;
        for entry in &entries {
            entry.embedding.validate()?;
            match dim {
                None => dim = Some(entry.embedding.dim()),
                Some(expected) if expected != entry.embedding.dim() => {
                    return Err(MatchError::DimensionMismatch {
                        expected,
                        actual: entry.embedding.dim(),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            version,
            dim,
            fingerprint: fingerprint(&entries),
            entries,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Shared dimensionality of all entries, `None` when empty.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// SHA-256 over labels and embedding values, hex encoded.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of enrolled entries per label.
    pub fn label_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.label.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn compare<M: Matcher>(
        &self,
        matcher: &M,
        faces: &[Embedding],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        matcher.compare_best(faces, &self.entries, threshold)
    }
}

fn fingerprint(entries: &[GalleryEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.label.as_bytes());
        hasher.update([0u8]);
        for v in &entry.embedding.values {
            hasher.update(v.to_le_bytes());
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Shared owner of the current gallery snapshot.
#[derive(Debug)]
pub struct GalleryHandle {
    current: RwLock<Arc<Gallery>>,
}

impl GalleryHandle {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            current: RwLock::new(Arc::new(gallery)),
        }
    }

    /// The snapshot in effect right now. The lock is held only for the clone.
    pub fn snapshot(&self) -> Arc<Gallery> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Validate `entries` and install them as the next version.
    ///
    /// On error the current snapshot stays in place.
    pub fn replace(&self, entries: Vec<GalleryEntry>) -> Result<Arc<Gallery>, MatchError> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(Gallery::with_version(entries, guard.version + 1)?);

        tracing::info!(
            from = guard.version,
            to = next.version,
            entries = next.len(),
            fingerprint = %next.fingerprint,
            "gallery snapshot replaced"
        );

        *guard = Arc::clone(&next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::EuclideanMatcher;

    fn entry(id: &str, label: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            id: id.into(),
            label: label.into(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_gallery_rejects_mixed_dimensions() {
        let err = Gallery::new(vec![
            entry("1", "Ana", vec![0.0, 1.0]),
            entry("2", "Luis", vec![0.0, 1.0, 2.0]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            MatchError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_empty_gallery_is_valid() {
        let gallery = Gallery::new(Vec::new()).unwrap();
        assert!(gallery.is_empty());
        assert_eq!(gallery.dim(), None);
        assert_eq!(gallery.version(), 1);
    }

    #[test]
    fn test_label_counts() {
        let gallery = Gallery::new(vec![
            entry("1", "Ana", vec![0.0]),
            entry("2", "Luis", vec![1.0]),
            entry("3", "Ana", vec![0.1]),
        ])
        .unwrap();
        let counts = gallery.label_counts();
        assert_eq!(counts.get("Ana"), Some(&2));
        assert_eq!(counts.get("Luis"), Some(&1));
    }

    #[test]
    fn test_replace_bumps_version_and_keeps_old_snapshot() {
        let handle = GalleryHandle::new(Gallery::new(vec![entry("1", "Ana", vec![0.0])]).unwrap());
        let before = handle.snapshot();

        let after = handle
            .replace(vec![entry("2", "Luis", vec![1.0]), entry("3", "Marta", vec![2.0])])
            .unwrap();

        assert_eq!(before.version(), 1);
        assert_eq!(before.len(), 1);
        assert_eq!(after.version(), 2);
        assert_eq!(handle.snapshot().len(), 2);
        assert_ne!(before.fingerprint(), after.fingerprint());
    }

    #[test]
    fn test_failed_replace_keeps_current() {
        let handle = GalleryHandle::new(Gallery::new(vec![entry("1", "Ana", vec![0.0])]).unwrap());
        assert!(handle
            .replace(vec![entry("2", "x", vec![0.0]), entry("3", "y", vec![0.0, 1.0])])
            .is_err());
        assert_eq!(handle.snapshot().version(), 1);
        assert_eq!(handle.snapshot().entries()[0].label, "Ana");
    }

    #[test]
    fn test_concurrent_readers_share_snapshot() {
        let handle = Arc::new(GalleryHandle::new(
            Gallery::new(vec![entry("1", "Ana", vec![0.0, 0.0])]).unwrap(),
        ));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                std::thread::spawn(move || {
                    let snapshot = handle.snapshot();
                    snapshot
                        .compare(&EuclideanMatcher, &[Embedding::new(vec![0.1, 0.0])], 0.6)
                        .unwrap()
                })
            })
            .collect();

        for worker in workers {
            let result = worker.join().unwrap();
            assert_eq!(result.label.as_deref(), Some("Ana"));
        }
    }
}
