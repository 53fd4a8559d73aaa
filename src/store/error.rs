//! Store error types

use hyper::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while accepting an upload
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file received")]
    MissingFile,

    #[error("Unexpected file field '{0}'")]
    UnexpectedField(String),

    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] multer::Error),

    #[error("Failed to write upload: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// HTTP status reported to the client
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingFile | Self::UnexpectedField(_) | Self::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::convert::Infallible> for UploadError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

/// Failures while loading or saving the content document
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Content file {} is not a valid JSON object: {source}", path.display())]
    MalformedContentFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read content file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save content file {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize content: {0}")]
    Serialize(#[from] serde_json::Error),
}
