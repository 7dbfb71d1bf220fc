use serde::{Deserialize, Serialize};

use crate::types::{FileDetails, FilePathDefinition};

// ---------------------------------------------------------------------------
// Begin
// ---------------------------------------------------------------------------

/// Wire protocol revision sent with the begin-upload call.
///
/// `1.1` asks the server to always use the multipart flow, even for files
/// that fit in a single part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultipartUploadProtocol {
    #[serde(rename = "1.0")]
    V1_0,
    #[default]
    #[serde(rename = "1.1")]
    V1_1,
}

/// Opens a multipart upload session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginMultipartUploadRequest {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<FilePathDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<MultipartUploadProtocol>,
}

/// How many parts the server expects, with part 0 inlined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParts {
    pub first: UploadPart,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginMultipartUploadResponse {
    pub file: FileDetails,
    pub upload_id: String,
    pub upload_parts: UploadParts,
}

// ---------------------------------------------------------------------------
// Parts
// ---------------------------------------------------------------------------

/// Byte range of one part, both ends inclusive.
///
/// The server describes the single part of an empty file as `0..=-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPartRange {
    pub inclusive_start: i64,
    pub inclusive_end: i64,
}

impl UploadPartRange {
    pub fn new(inclusive_start: i64, inclusive_end: i64) -> Self {
        Self {
            inclusive_start,
            inclusive_end,
        }
    }

    /// Number of bytes covered. Zero for the empty-file sentinel and for
    /// inverted ranges; see [`is_well_formed`](Self::is_well_formed).
    pub fn len(&self) -> u64 {
        self.inclusive_end
            .checked_sub(self.inclusive_start)
            .and_then(|d| d.checked_add(1))
            .filter(|n| *n > 0)
            .map_or(0, |n| n as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exclusive end offset, suitable for slicing.
    pub fn end_exclusive(&self) -> u64 {
        (self.inclusive_start.max(0) as u64).saturating_add(self.len())
    }

    /// A non-negative start with `end >= start`, or the `0..=-1` sentinel.
    pub fn is_well_formed(&self) -> bool {
        self.inclusive_start >= 0
            && (self.inclusive_end >= self.inclusive_start
                || (self.inclusive_start == 0 && self.inclusive_end == -1))
    }
}

/// Where and which bytes to PUT for one part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPart {
    pub upload_id: String,
    pub upload_part_index: u32,
    pub upload_url: String,
    pub range: UploadPartRange,
}

/// Confirms one part with the etag returned by the storage PUT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteUploadPartRequest {
    pub etag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartCompletionStatus {
    Pending,
    Completed,
}

/// Answer to a part confirmation.
///
/// Exactly one confirmation per upload returns `Completed`, carrying the
/// etag of the assembled file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartUploadResponse {
    pub status: PartCompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl CompleteMultipartUploadResponse {
    /// The final etag, if this confirmation completed the upload.
    pub fn completed_etag(&self) -> Option<&str> {
        match self.status {
            PartCompletionStatus::Completed => self.etag.as_deref(),
            PartCompletionStatus::Pending => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by the API on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
