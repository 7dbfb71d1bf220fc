//! HTTP implementation of [`UploadApi`] using `reqwest`.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytelift_protocol::{
    BeginMultipartUploadRequest, BeginMultipartUploadResponse, CompleteMultipartUploadResponse,
    CompleteUploadPartRequest, ErrorResponse, UploadPart,
};
use bytelift_transfer::{PartBody, ProgressStream};
use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::{CONTENT_LENGTH, ETAG, HeaderMap};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{ApiFuture, PartProgress, PutPartResponse, UploadApi};
use crate::auth::{AuthHeaders, SessionHandle};
use crate::error::UploadError;

pub const DEFAULT_BASE_URL: &str = "https://api.bytescale.com";

/// Upload API client.
///
/// API calls carry the configured auth headers. Part bodies go straight
/// to their pre-signed URLs without them.
pub struct HttpUploadApi {
    http: reqwest::Client,
    base_url: String,
    account_id: String,
    auth: Vec<Arc<dyn AuthHeaders>>,
}

impl HttpUploadApi {
    pub fn new(
        account_id: impl Into<String>,
        auth: Arc<dyn AuthHeaders>,
    ) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            account_id: account_id.into(),
            auth: vec![auth],
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Adds the session's `authorization-token` header to API calls.
    pub fn with_session(mut self, session: Arc<SessionHandle>) -> Self {
        self.auth.push(session);
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn uploads_url(&self) -> String {
        format!("{}/v2/accounts/{}/uploads", self.base_url, self.account_id)
    }

    fn part_url(&self, upload_id: &str, part_index: u32) -> String {
        format!("{}/{upload_id}/parts/{part_index}", self.uploads_url())
    }

    async fn auth_headers(&self) -> Result<HeaderMap, UploadError> {
        let mut merged = HeaderMap::new();
        for source in &self.auth {
            merged.extend(source.headers().await?);
        }
        Ok(merged)
    }

    /// Sends an API request and decodes the JSON response.
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, UploadError> {
        let headers = self.auth_headers().await?;
        let resp = request.headers(headers).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_slice(&body)
            .map_err(|e| UploadError::Protocol(format!("malformed response body: {e}")))
    }
}

/// Builds an [`UploadError::Api`], using the JSON error body when there is one.
fn api_error(status: u16, body: &[u8]) -> UploadError {
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(parsed) => UploadError::Api {
            status,
            code: parsed.error.code,
            message: parsed.error.message,
        },
        Err(_) => UploadError::Api {
            status,
            code: "unknown".into(),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

impl UploadApi for HttpUploadApi {
    fn begin_multipart_upload<'a>(
        &'a self,
        request: &'a BeginMultipartUploadRequest,
    ) -> ApiFuture<'a, BeginMultipartUploadResponse> {
        Box::pin(async move {
            debug!(size = request.size, "beginning multipart upload");
            self.send_json(self.http.post(self.uploads_url()).json(request))
                .await
        })
    }

    fn get_upload_part<'a>(
        &'a self,
        upload_id: &'a str,
        part_index: u32,
    ) -> ApiFuture<'a, UploadPart> {
        Box::pin(async move {
            self.send_json(self.http.get(self.part_url(upload_id, part_index)))
                .await
        })
    }

    fn put_upload_part<'a>(
        &'a self,
        part: &'a UploadPart,
        body: PartBody,
        on_progress: PartProgress,
    ) -> ApiFuture<'a, PutPartResponse> {
        Box::pin(async move {
            let len = body.len();
            let stream = SyncStream::new(ProgressStream::new(body.into_stream(), on_progress));

            // An explicit length keeps the transport from falling back to chunked encoding.
            let resp = self
                .http
                .put(&part.upload_url)
                .header(CONTENT_LENGTH, len)
                .body(reqwest::Body::wrap_stream(stream))
                .send()
                .await?;

            let etag = resp
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            Ok(PutPartResponse {
                status: resp.status().as_u16(),
                etag,
            })
        })
    }

    fn complete_upload_part<'a>(
        &'a self,
        upload_id: &'a str,
        part_index: u32,
        request: &'a CompleteUploadPartRequest,
    ) -> ApiFuture<'a, CompleteMultipartUploadResponse> {
        Box::pin(async move {
            self.send_json(
                self.http
                    .put(self.part_url(upload_id, part_index))
                    .json(request),
            )
            .await
        })
    }
}

/// Makes a `Send` stream `Sync` for use as a request body.
struct SyncStream<S>(Mutex<S>);

impl<S> SyncStream<S> {
    fn new(inner: S) -> Self {
        Self(Mutex::new(inner))
    }
}

impl<S> Stream for SyncStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let inner = self
            .get_mut()
            .0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        Pin::new(inner).poll_next(cx)
    }
}
