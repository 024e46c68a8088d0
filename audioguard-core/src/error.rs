use thiserror::Error;

use crate::detection::DetectionError;
use crate::quota::QuotaExceeded;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AudioGuardError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Detection client error: {0}")]
    Detection(#[from] DetectionError),
}

/// Rejections raised before any external call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No audio file provided")]
    MissingFile,

    #[error("Unsupported file type '{0}'. Only MP3, WAV and OGG audio are accepted")]
    UnsupportedMimeType(String),

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("File size {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },

    #[error("Malformed multipart request: {0}")]
    Multipart(String),
}

/// Everything that can end an upload request early.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UploadError {
    /// Upstream response payload attached to the failure, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            UploadError::Detection(e) => e.details(),
            _ => None,
        }
    }
}

impl From<crate::quota::QuotaCheckError> for UploadError {
    fn from(err: crate::quota::QuotaCheckError) -> Self {
        match err {
            crate::quota::QuotaCheckError::Exceeded(e) => UploadError::QuotaExceeded(e),
            crate::quota::QuotaCheckError::Store(e) => UploadError::Store(e),
        }
    }
}
