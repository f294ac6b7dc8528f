//! attend-store — Persistence collaborators for the attendance engine.
//!
//! SQLite-backed reference data (users, groups, subjects, weekly schedule,
//! calendar overrides) and attendance records, plus loaders for gallery
//! snapshots and reference-data import files.

pub mod gallery;
pub mod import;
mod schema;
pub mod store;

pub use gallery::{load_gallery, parse_gallery, GalleryFileError};
pub use import::{ImportError, ImportSummary, ReferenceData};
pub use store::{ProfessorClass, RegisteredStudent, Store, StoreError};
