//! Upload error types.

use bytelift_transfer::TransferError;

/// Errors produced by an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("unsupported source type: {0}")]
    UnsupportedSourceType(String),

    #[error("a size must be given when uploading a stream")]
    MissingSizeForStream,

    #[error("stream ended early; the given size is likely larger than its contents")]
    PrematureEndOfStream,

    #[error("failed to upload part {part_index}: {reason}")]
    PartUploadFailed { part_index: u32, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("auth error: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(TransferError),
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::UnsupportedSourceType(what) => Self::UnsupportedSourceType(what),
            TransferError::MissingSizeForStream => Self::MissingSizeForStream,
            TransferError::PrematureEndOfStream => Self::PrematureEndOfStream,
            TransferError::Cancelled => Self::Cancelled,
            TransferError::Io(e) => Self::Io(e),
            other => Self::Transfer(other),
        }
    }
}
