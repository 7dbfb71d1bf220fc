//! Wire types for the multipart upload API.
//!
//! All payloads use camelCase JSON field names.

pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    BeginMultipartUploadRequest, BeginMultipartUploadResponse, CompleteMultipartUploadResponse,
    CompleteUploadPartRequest, ErrorDetail, ErrorResponse, MultipartUploadProtocol,
    PartCompletionStatus, UploadPart, UploadPartRange, UploadParts,
};
pub use types::{DynamicFilePath, FileDetails, FilePathDefinition, UploadProgress, UploadedFile};
