//! Pre-extracted face embeddings.
//!
//! The face encoder runs outside this program and hands over one JSON
//! document per photograph, either a bare list of vectors or
//! `{ "faces": [[...], ...], "model_version": "..." }`.

use std::path::Path;

use attend_core::source::require_faces;
use attend_core::{Embedding, EmbeddingSource, ExtractError};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum FacesDocument {
    List(Vec<Vec<f32>>),
    Object {
        faces: Vec<Vec<f32>>,
        #[serde(default)]
        model_version: Option<String>,
    },
}

/// [`EmbeddingSource`] over JSON documents produced by the external encoder.
#[derive(Debug, Default)]
pub struct JsonFaces;

impl EmbeddingSource for JsonFaces {
    fn extract(&mut self, image: &[u8]) -> Result<Vec<Embedding>, ExtractError> {
        let document: FacesDocument = serde_json::from_slice(image)
            .map_err(|e| ExtractError::Malformed(e.to_string()))?;

        let faces = match document {
            FacesDocument::List(faces) => faces.into_iter().map(Embedding::new).collect(),
            FacesDocument::Object {
                faces,
                model_version,
            } => faces
                .into_iter()
                .map(|values| Embedding {
                    values,
                    model_version: model_version.clone(),
                })
                .collect(),
        };
        require_faces(faces)
    }
}

/// Read and decode a faces file. I/O failures are reported as malformed input.
pub fn read_faces(path: &Path) -> Result<Vec<Embedding>, ExtractError> {
    let raw = std::fs::read(path)
        .map_err(|e| ExtractError::Malformed(format!("{}: {e}", path.display())))?;
    JsonFaces.extract(&raw)
}
