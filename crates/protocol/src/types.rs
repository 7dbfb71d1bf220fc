use serde::{Deserialize, Serialize};

/// Where the uploaded file should be stored.
///
/// The API accepts either an absolute path or a path template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilePathDefinition {
    Absolute(String),
    Dynamic(DynamicFilePath),
}

impl From<&str> for FilePathDefinition {
    fn from(path: &str) -> Self {
        Self::Absolute(path.to_owned())
    }
}

impl From<String> for FilePathDefinition {
    fn from(path: String) -> Self {
        Self::Absolute(path)
    }
}

impl From<DynamicFilePath> for FilePathDefinition {
    fn from(path: DynamicFilePath) -> Self {
        Self::Dynamic(path)
    }
}

/// A `fileName` and/or `folderPath`, optionally with path variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicFilePath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name_fallback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name_variables_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_path_variables_enabled: Option<bool>,
}

/// File details as returned by the begin-upload call.
///
/// `etag` is absent until the final part has been confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetails {
    pub account_id: String,
    pub file_path: String,
    pub file_url: String,
    pub mime: String,
    pub size: u64,
    #[serde(default)]
    pub original_file_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl FileDetails {
    /// Attaches the authoritative etag of a finished upload.
    pub fn into_uploaded(self, etag: String) -> UploadedFile {
        UploadedFile {
            account_id: self.account_id,
            file_path: self.file_path,
            file_url: self.file_url,
            mime: self.mime,
            size: self.size,
            original_file_name: self.original_file_name,
            tags: self.tags,
            metadata: self.metadata,
            last_modified: self.last_modified,
            etag,
        }
    }
}

/// A fully uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub account_id: String,
    pub file_path: String,
    pub file_url: String,
    pub mime: String,
    pub size: u64,
    #[serde(default)]
    pub original_file_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub last_modified: i64,
    pub etag: String,
}

/// Aggregate progress of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
    /// Whole percent, 0-100.
    pub progress: u8,
}

impl UploadProgress {
    /// Builds a progress event, rounding the percentage to the nearest integer.
    ///
    /// An empty upload (`bytes_total == 0`) counts as 100%.
    pub fn new(bytes_sent: u64, bytes_total: u64) -> Self {
        let progress = if bytes_total == 0 {
            100
        } else {
            let ratio = bytes_sent.min(bytes_total) as f64 / bytes_total as f64;
            (ratio * 100.0).round() as u8
        };
        Self {
            bytes_sent,
            bytes_total,
            progress,
        }
    }

    /// The event raised before any bytes have been sent.
    pub fn initial(bytes_total: u64) -> Self {
        Self {
            bytes_sent: 0,
            bytes_total,
            progress: 0,
        }
    }

    /// Returns `true` once every byte has been sent.
    pub fn is_complete(&self) -> bool {
        self.bytes_sent == self.bytes_total
    }
}
