//! Multipart upload engine.
//!
//! [`UploadManager::upload`] normalizes the input, opens a multipart
//! session, and runs a bounded pool of workers that each fetch a part
//! descriptor, PUT its byte range and confirm it with the API. Progress
//! is aggregated across workers and any failure cancels every sibling.

pub mod api;
pub mod auth;
pub mod error;
pub mod http;
pub mod manager;
pub mod pool;
pub mod scheduler;

pub use api::{PutPartResponse, UploadApi};
pub use auth::{ApiKeyAuth, AuthHeaders, SessionHandle};
pub use error::UploadError;
pub use http::{DEFAULT_BASE_URL, HttpUploadApi};
pub use manager::{UploadManager, UploadParams};
pub use scheduler::{PartScheduler, UploadSessionMetadata};

pub use bytelift_transfer::{CancelHandle, UploadData};
pub use tokio_util::sync::CancellationToken;
