//! Gallery snapshot files.
//!
//! Two JSON layouts are accepted:
//!
//! ```json
//! { "entries": [ { "label": "Ana", "embedding": [0.1, ...], "id": "optional" } ] }
//! { "names": ["Ana", ...], "encodings": [[0.1, ...], ...] }
//! ```
//!
//! The second is the column layout written by the enrollment pipeline.
//! Entries without an id get a random one.

use std::path::Path;

use attend_core::{Embedding, GalleryEntry};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryFileError {
    #[error("gallery file not found: {0}")]
    NotFound(String),
    #[error("reading gallery file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing gallery file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gallery columns differ in length: {names} names, {encodings} encodings")]
    ColumnMismatch { names: usize, encodings: usize },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GalleryFile {
    Entries { entries: Vec<FileEntry> },
    Columns {
        names: Vec<String>,
        encodings: Vec<Vec<f32>>,
        #[serde(default)]
        model_version: Option<String>,
    },
}

#[derive(Deserialize)]
struct FileEntry {
    #[serde(default)]
    id: Option<String>,
    label: String,
    embedding: Vec<f32>,
    #[serde(default)]
    model_version: Option<String>,
}

/// Read a gallery snapshot from disk.
///
/// Dimensionality is not checked here; building an
/// [`attend_core::Gallery`] from the entries does that.
pub fn load_gallery(path: &Path) -> Result<Vec<GalleryEntry>, GalleryFileError> {
    if !path.exists() {
        return Err(GalleryFileError::NotFound(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path)?;
    let entries = parse_gallery(&raw)?;
    tracing::info!(path = %path.display(), entries = entries.len(), "gallery file loaded");
    Ok(entries)
}

pub fn parse_gallery(raw: &str) -> Result<Vec<GalleryEntry>, GalleryFileError> {
    let entries = match serde_json::from_str::<GalleryFile>(raw)? {
        GalleryFile::Entries { entries } => entries
            .into_iter()
            .map(|e| GalleryEntry {
                id: e.id.unwrap_or_else(new_id),
                label: e.label,
                embedding: Embedding {
                    values: e.embedding,
                    model_version: e.model_version,
                },
            })
            .collect(),
        GalleryFile::Columns {
            names,
            encodings,
            model_version,
        } => {
            if names.len() != encodings.len() {
                return Err(GalleryFileError::ColumnMismatch {
                    names: names.len(),
                    encodings: encodings.len(),
                });
            }
            names
                .into_iter()
                .zip(encodings)
                .map(|(label, values)| GalleryEntry {
                    id: new_id(),
                    label,
                    embedding: Embedding {
                        values,
                        model_version: model_version.clone(),
                    },
                })
                .collect()
        }
    };
    Ok(entries)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
