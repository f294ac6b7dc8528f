//! Boundary to the external face embedding extractor.

use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected in the photograph")]
    NoFaceDetected,
    #[error("extractor input is malformed: {0}")]
    Malformed(String),
}

/// Turns one photograph into one embedding per detected face.
pub trait EmbeddingSource {
    fn extract(&mut self, image: &[u8]) -> Result<Vec<Embedding>, ExtractError>;
}

/// Fail with [`ExtractError::NoFaceDetected`] when nothing was found.
pub fn require_faces(faces: Vec<Embedding>) -> Result<Vec<Embedding>, ExtractError> {
    if faces.is_empty() {
        return Err(ExtractError::NoFaceDetected);
    }
    Ok(faces)
}
