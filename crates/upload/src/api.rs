//! Upload API trait.
//!
//! [`HttpUploadApi`](crate::HttpUploadApi) implements this over HTTP. The
//! engine only talks to the trait, so it can be driven by mocks in tests.

use std::future::Future;
use std::pin::Pin;

use bytelift_protocol::{
    BeginMultipartUploadRequest, BeginMultipartUploadResponse, CompleteMultipartUploadResponse,
    CompleteUploadPartRequest, UploadPart,
};
use bytelift_transfer::PartBody;

use crate::error::UploadError;

/// Boxed future returned by [`UploadApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Callback receiving the cumulative bytes sent for one part body.
pub type PartProgress = Box<dyn FnMut(u64) + Send>;

/// Raw outcome of a part PUT. Status and etag are validated by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutPartResponse {
    pub status: u16,
    pub etag: Option<String>,
}

impl PutPartResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The four calls of the multipart upload protocol.
pub trait UploadApi: Send + Sync {
    /// Opens a session. The response inlines part 0.
    fn begin_multipart_upload<'a>(
        &'a self,
        request: &'a BeginMultipartUploadRequest,
    ) -> ApiFuture<'a, BeginMultipartUploadResponse>;

    fn get_upload_part<'a>(
        &'a self,
        upload_id: &'a str,
        part_index: u32,
    ) -> ApiFuture<'a, UploadPart>;

    /// PUTs `body` to the part's pre-signed URL.
    ///
    /// `on_progress` is called as the transport consumes the body.
    fn put_upload_part<'a>(
        &'a self,
        part: &'a UploadPart,
        body: PartBody,
        on_progress: PartProgress,
    ) -> ApiFuture<'a, PutPartResponse>;

    fn complete_upload_part<'a>(
        &'a self,
        upload_id: &'a str,
        part_index: u32,
        request: &'a CompleteUploadPartRequest,
    ) -> ApiFuture<'a, CompleteMultipartUploadResponse>;
}
