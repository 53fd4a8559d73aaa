//! Persistence layer
//!
//! Two independent stores sit behind the HTTP handlers: a flat upload
//! directory and the single site content document.

pub mod content;
pub mod error;
pub mod upload;

pub use content::{ContentDocument, ContentStore, StartupState};
pub use error::{ContentError, UploadError};
pub use upload::{StoredFile, UploadStore};
