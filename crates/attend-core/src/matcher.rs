//! Nearest-neighbor matching of a query embedding against a gallery.

use thiserror::Error;

use crate::types::{Embedding, GalleryEntry, MatchResult};

/// Distance below which a nearest neighbor is accepted, on the [0, 2]
/// scale of unit-normalized embeddings.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("invalid embedding: expected {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid embedding: vector is empty")]
    EmptyEmbedding,
    #[error("invalid embedding: non-finite value at index {index}")]
    NonFinite { index: usize },
    #[error("invalid threshold: {0}")]
    InvalidThreshold(f32),
}

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;

    /// Match every face found in one photograph and keep the closest result.
    ///
    /// On equal distances the earlier face wins. An empty face list yields
    /// an unknown result.
    fn compare_best(
        &self,
        faces: &[Embedding],
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let mut best: Option<MatchResult> = None;

        for face in faces {
            let result = self.compare(face, gallery, threshold)?;
            let is_better = match (&best, result.nearest_distance) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(prev), Some(d)) => prev.nearest_distance.map_or(true, |p| d < p),
            };
            if is_better {
                best = Some(result);
            }
        }

        Ok(best.unwrap_or_else(|| MatchResult::unknown(None)))
    }
}

/// Euclidean nearest-neighbor matcher.
///
/// Visits every gallery entry, so all enrolled photos of a label are
/// considered and a malformed entry anywhere in the gallery aborts the match.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[GalleryEntry],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        // Nothing to compare against: unknown regardless of the inputs.
        if gallery.is_empty() {
            return Ok(MatchResult::unknown(None));
        }
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(MatchError::InvalidThreshold(threshold));
        }
        query.validate()?;

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            // A NaN distance would never compare below a later one.
            entry.embedding.validate()?;
            let dist = query.euclidean_distance(&entry.embedding)?;
            // Strict comparison: the first of several equidistant entries wins.
            if best_idx.is_none() || dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        let result = match best_idx {
            Some(idx) if best_dist < threshold => MatchResult {
                matched: true,
                nearest_distance: Some(best_dist),
                confidence: (1.0 - best_dist).max(0.0),
                entry_id: Some(gallery[idx].id.clone()),
                label: Some(gallery[idx].label.clone()),
            },
            Some(_) => MatchResult::unknown(Some(best_dist)),
            None => MatchResult::unknown(None),
        };

        tracing::debug!(
            gallery = gallery.len(),
            matched = result.matched,
            distance = ?result.nearest_distance,
            label = result.label_or_unknown(),
            "match computed"
        );

        Ok(result)
    }
}
