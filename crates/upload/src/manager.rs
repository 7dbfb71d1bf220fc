//! Upload orchestration.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytelift_protocol::{
    BeginMultipartUploadRequest, CompleteUploadPartRequest, FilePathDefinition,
    MultipartUploadProtocol, UploadPart, UploadProgress, UploadedFile,
};
use bytelift_transfer::{
    CancelHandle, CancellationRegistry, ProgressAggregator, ProgressCallback, SourceOverrides,
    UploadData, UploadSource, describe, normalize,
};
use futures_util::future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::UploadApi;
use crate::error::UploadError;
use crate::pool::run_workers;
use crate::scheduler::PartScheduler;

type BeginCallback = Box<dyn FnOnce(CancelHandle) + Send>;

/// Options for one [`UploadManager::upload`] call.
#[derive(Default)]
pub struct UploadParams {
    pub path: Option<FilePathDefinition>,
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    /// Total size. Required for stream sources.
    pub size: Option<u64>,
    pub mime: Option<String>,
    pub original_file_name: Option<String>,
    pub max_concurrent_upload_parts: Option<usize>,
    pub on_progress: Option<ProgressCallback>,
    /// Called once the upload has been accepted, before any network call.
    pub on_begin: Option<BeginCallback>,
    pub cancellation_token: Option<CancellationToken>,
}

impl UploadParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<FilePathDefinition>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn original_file_name(mut self, name: impl Into<String>) -> Self {
        self.original_file_name = Some(name.into());
        self
    }

    pub fn max_concurrent_upload_parts(mut self, count: usize) -> Self {
        self.max_concurrent_upload_parts = Some(count);
        self
    }

    pub fn on_progress(mut self, f: impl Fn(UploadProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_begin(mut self, f: impl FnOnce(CancelHandle) + Send + 'static) -> Self {
        self.on_begin = Some(Box::new(f));
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }
}

impl fmt::Debug for UploadParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadParams")
            .field("path", &self.path)
            .field("tags", &self.tags)
            .field("metadata", &self.metadata)
            .field("size", &self.size)
            .field("mime", &self.mime)
            .field("original_file_name", &self.original_file_name)
            .field("max_concurrent_upload_parts", &self.max_concurrent_upload_parts)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_begin", &self.on_begin.is_some())
            .field("cancellation_token", &self.cancellation_token)
            .finish()
    }
}

/// Drives multipart uploads against an [`UploadApi`].
#[derive(Clone)]
pub struct UploadManager {
    api: Arc<dyn UploadApi>,
}

impl UploadManager {
    pub fn new(api: Arc<dyn UploadApi>) -> Self {
        Self { api }
    }

    /// Uploads `data` and returns the stored file.
    ///
    /// Input is validated before any network call. The first progress event
    /// (`{0, size, 0}`) is raised synchronously, then `on_begin` receives a
    /// cancel handle. Any failure cancels every in-flight part. Cancellation
    /// through the handle or the caller's token settles with
    /// [`UploadError::Cancelled`].
    pub async fn upload(
        &self,
        data: impl Into<UploadData>,
        params: UploadParams,
    ) -> Result<UploadedFile, UploadError> {
        let UploadParams {
            path,
            tags,
            metadata,
            size,
            mime,
            original_file_name,
            max_concurrent_upload_parts,
            on_progress,
            on_begin,
            cancellation_token,
        } = params;

        let caller_token = cancellation_token.unwrap_or_default();
        if caller_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let source = normalize(data.into())?;
        let info = describe(
            &source,
            &SourceOverrides {
                size,
                mime,
                original_file_name,
                max_concurrent_upload_parts,
            },
        )?;

        let registry = CancellationRegistry::new();
        let progress = Arc::new(ProgressAggregator::new(
            info.size,
            info.max_concurrent_upload_parts,
            on_progress,
        ));
        progress.initial();

        if let Some(on_begin) = on_begin {
            on_begin(registry.handle());
        }

        let request = BeginMultipartUploadRequest {
            size: info.size,
            mime: info.mime,
            original_file_name: info.original_file_name,
            path,
            metadata,
            tags: (!tags.is_empty()).then_some(tags),
            protocol: Some(MultipartUploadProtocol::V1_1),
        };

        let job = UploadJob {
            api: self.api.as_ref(),
            source: &source,
            registry: &registry,
            progress: &progress,
            workers: info.max_concurrent_upload_parts,
        };

        let result = tokio::select! {
            biased;
            _ = caller_token.cancelled() => {
                registry.cancel();
                Err(UploadError::Cancelled)
            }
            result = job.run(&request) => result,
        };

        // Releases the drain pipeline however the upload ended.
        if let Some(chunked) = source.chunked() {
            chunked.finished_consuming();
        }
        if result.is_err() {
            registry.cancel();
        }
        result
    }
}

impl fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadManager").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// UploadJob
// ---------------------------------------------------------------------------

/// Borrowed state shared by the workers of one upload.
struct UploadJob<'a> {
    api: &'a dyn UploadApi,
    source: &'a UploadSource,
    registry: &'a CancellationRegistry,
    progress: &'a Arc<ProgressAggregator>,
    workers: usize,
}

impl UploadJob<'_> {
    async fn run(
        &self,
        request: &BeginMultipartUploadRequest,
    ) -> Result<UploadedFile, UploadError> {
        let (session, scheduler) =
            guarded(self.registry, PartScheduler::begin_session(self.api, request)).await?;

        info!(
            upload_id = %session.upload_id,
            parts = session.part_count,
            workers = self.workers,
            size = request.size,
            source = self.source.kind(),
            "multipart upload started"
        );

        let pool = async {
            let result = run_workers(self.workers, self.registry, |worker| {
                self.worker_loop(&scheduler, &session.upload_id, worker)
            })
            .await;
            if let Some(chunked) = self.source.chunked() {
                chunked.finished_consuming();
            }
            result
        };

        let outcome = match self.source.chunked() {
            Some(chunked) => {
                let (pool_result, pipeline_result) =
                    future::join(pool, chunked.run_drain_pipeline()).await;
                match (pool_result, pipeline_result) {
                    (Err(UploadError::Cancelled), _) => Err(UploadError::Cancelled),
                    // The source failing explains the part failure better.
                    (Err(_), Err(pipeline_err)) => Err(pipeline_err.into()),
                    (Ok(etags), Err(pipeline_err)) => {
                        warn!(error = %pipeline_err, "stream errored after every part was sent");
                        Ok(etags)
                    }
                    (result, Ok(())) => result,
                }
            }
            None => pool.await,
        };

        let final_etag = outcome?.into_iter().flatten().next().ok_or_else(|| {
            UploadError::Protocol("no part completion reported the upload as completed".into())
        })?;

        info!(
            upload_id = %session.upload_id,
            file_path = %session.file.file_path,
            bytes_by_worker = ?self.progress.sent_by_worker(),
            "multipart upload completed"
        );
        Ok(session.file.into_uploaded(final_etag))
    }

    /// Uploads parts until the scheduler runs out. Returns the final etag if
    /// this worker confirmed the last part.
    async fn worker_loop(
        &self,
        scheduler: &PartScheduler,
        upload_id: &str,
        worker: usize,
    ) -> Result<Option<String>, UploadError> {
        let mut final_etag = None;

        while let Some(index) = scheduler.next_part_index() {
            let part = guarded(self.registry, scheduler.get_part(self.api, index)).await?;
            debug!(worker, part = index, len = part.range.len(), "uploading part");

            let etag = self.put_part(&part, worker).await?;

            let completion = guarded(
                self.registry,
                self.api
                    .complete_upload_part(upload_id, index, &CompleteUploadPartRequest { etag }),
            )
            .await?;
            debug!(worker, part = index, status = ?completion.status, "part confirmed");

            if let Some(etag) = completion.completed_etag() {
                final_etag = Some(etag.to_owned());
            }
        }

        Ok(final_etag)
    }

    async fn put_part(&self, part: &UploadPart, worker: usize) -> Result<String, UploadError> {
        let index = part.upload_part_index;
        let body = self.source.slice(part.range).await?;
        let len = body.len();

        self.progress.begin_part(worker);
        let progress = Arc::clone(self.progress);
        let on_progress = Box::new(move |sent: u64| progress.on_part_progress(worker, sent));

        let response =
            guarded(self.registry, self.api.put_upload_part(part, body, on_progress)).await?;
        if !response.is_success() {
            return Err(UploadError::PartUploadFailed {
                part_index: index,
                reason: format!("HTTP {}", response.status),
            });
        }
        let etag = response.etag.ok_or_else(|| UploadError::PartUploadFailed {
            part_index: index,
            reason: "no 'etag' response header".into(),
        })?;

        self.progress.finish_part(worker, len);
        Ok(etag)
    }
}

/// Runs one network operation that the registry can abort.
///
/// Nothing is started once the registry is cancelled. The abort handler is
/// unregistered as soon as the operation settles.
async fn guarded<T>(
    registry: &CancellationRegistry,
    op: impl Future<Output = Result<T, UploadError>>,
) -> Result<T, UploadError> {
    if registry.is_cancelled() {
        return Err(UploadError::Cancelled);
    }

    let abort = CancellationToken::new();
    let _handler = {
        let abort = abort.clone();
        registry.add_handler(move || abort.cancel())
    };

    tokio::select! {
        biased;
        _ = abort.cancelled() => Err(UploadError::Cancelled),
        result = op => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;

    use bytelift_protocol::{
        BeginMultipartUploadResponse, CompleteMultipartUploadResponse, FileDetails,
        PartCompletionStatus, UploadPartRange, UploadParts,
    };
    use bytelift_transfer::PartBody;
    use bytes::Bytes;
    use futures_util::stream;
    use tokio::sync::Notify;

    use crate::api::{ApiFuture, PartProgress, PutPartResponse};

    fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
        m.lock().unwrap()
    }

    fn range_for(size: u64, part_size: u64, index: u32) -> UploadPartRange {
        let start = index as u64 * part_size;
        let end = (start + part_size).min(size);
        UploadPartRange::new(start as i64, end as i64 - 1)
    }

    #[derive(Default)]
    struct MockState {
        begins: Vec<BeginMultipartUploadRequest>,
        size: u64,
        part_count: u32,
        bodies: BTreeMap<u32, Vec<u8>>,
        puts: Vec<u32>,
        completes: Vec<(u32, String)>,
    }

    /// Splits uploads into `part_size` parts and records every call.
    struct MockApi {
        part_size: u64,
        fail_part: Option<u32>,
        hang_part: Option<u32>,
        hang_all: bool,
        omit_etag_part: Option<u32>,
        never_complete: bool,
        put_delay: Duration,
        state: Mutex<MockState>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        put_started: Notify,
    }

    impl MockApi {
        fn new(part_size: u64) -> Self {
            Self {
                part_size,
                fail_part: None,
                hang_part: None,
                hang_all: false,
                omit_etag_part: None,
                never_complete: false,
                put_delay: Duration::ZERO,
                state: Mutex::new(MockState::default()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                put_started: Notify::new(),
            }
        }

        fn part(&self, index: u32) -> UploadPart {
            let size = lock(&self.state).size;
            UploadPart {
                upload_id: "up1".into(),
                upload_part_index: index,
                upload_url: format!("https://storage.test/up1/{index}"),
                range: range_for(size, self.part_size, index),
            }
        }

        fn reassembled(&self) -> Vec<u8> {
            lock(&self.state).bodies.values().flatten().copied().collect()
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl UploadApi for MockApi {
        fn begin_multipart_upload<'a>(
            &'a self,
            request: &'a BeginMultipartUploadRequest,
        ) -> ApiFuture<'a, BeginMultipartUploadResponse> {
            Box::pin(async move {
                let part_count = if request.size == 0 {
                    1
                } else {
                    request.size.div_ceil(self.part_size) as u32
                };
                {
                    let mut state = lock(&self.state);
                    state.begins.push(request.clone());
                    state.size = request.size;
                    state.part_count = part_count;
                }
                Ok(BeginMultipartUploadResponse {
                    file: FileDetails {
                        account_id: "acc1".into(),
                        file_path: "/uploads/file.bin".into(),
                        file_url: "https://upcdn.io/acc1/raw/uploads/file.bin".into(),
                        mime: request.mime.clone().unwrap_or_default(),
                        size: request.size,
                        original_file_name: request.original_file_name.clone(),
                        tags: request.tags.clone().unwrap_or_default(),
                        metadata: request.metadata.clone().unwrap_or_default(),
                        last_modified: 0,
                        etag: None,
                    },
                    upload_id: "up1".into(),
                    upload_parts: UploadParts {
                        first: self.part(0),
                        count: part_count,
                    },
                })
            })
        }

        fn get_upload_part<'a>(
            &'a self,
            _upload_id: &'a str,
            part_index: u32,
        ) -> ApiFuture<'a, UploadPart> {
            Box::pin(async move { Ok(self.part(part_index)) })
        }

        fn put_upload_part<'a>(
            &'a self,
            part: &'a UploadPart,
            body: PartBody,
            mut on_progress: PartProgress,
        ) -> ApiFuture<'a, PutPartResponse> {
            Box::pin(async move {
                let index = part.upload_part_index;
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                let _in_flight = InFlight(&self.in_flight);
                self.peak.fetch_max(now, Ordering::SeqCst);
                lock(&self.state).puts.push(index);
                self.put_started.notify_one();

                if self.hang_all || self.hang_part == Some(index) {
                    std::future::pending::<()>().await;
                }

                let len = body.len();
                let bytes = body.into_bytes().await?;
                on_progress(len / 2);
                if !self.put_delay.is_zero() {
                    tokio::time::sleep(self.put_delay).await;
                }
                on_progress(len);

                if self.fail_part == Some(index) {
                    return Ok(PutPartResponse {
                        status: 500,
                        etag: None,
                    });
                }

                lock(&self.state).bodies.insert(index, bytes.to_vec());
                let etag =
                    (self.omit_etag_part != Some(index)).then(|| format!("\"part-{index}\""));
                Ok(PutPartResponse { status: 200, etag })
            })
        }

        fn complete_upload_part<'a>(
            &'a self,
            _upload_id: &'a str,
            part_index: u32,
            request: &'a CompleteUploadPartRequest,
        ) -> ApiFuture<'a, CompleteMultipartUploadResponse> {
            Box::pin(async move {
                let mut state = lock(&self.state);
                state.completes.push((part_index, request.etag.clone()));
                let done =
                    !self.never_complete && state.completes.len() as u32 == state.part_count;
                Ok(CompleteMultipartUploadResponse {
                    status: if done {
                        PartCompletionStatus::Completed
                    } else {
                        PartCompletionStatus::Pending
                    },
                    etag: done.then(|| "\"final\"".to_string()),
                })
            })
        }
    }

    fn recorder() -> (
        Arc<Mutex<Vec<UploadProgress>>>,
        impl Fn(UploadProgress) + Send + Sync + 'static,
    ) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |p| sink.lock().unwrap().push(p))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn chunked_stream(data: Vec<u8>, chunk: usize) -> UploadData {
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(chunk)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        UploadData::stream(stream::iter(chunks))
    }

    #[tokio::test]
    async fn empty_source_uploads_one_empty_part() {
        let api = Arc::new(MockApi::new(10));
        let manager = UploadManager::new(api.clone());
        let (events, on_progress) = recorder();

        let file = manager
            .upload(Vec::new(), UploadParams::new().on_progress(on_progress))
            .await
            .unwrap();

        assert_eq!(file.etag, "\"final\"");
        assert_eq!(api.part(0).range.inclusive_end, -1);
        let state = lock(&api.state);
        assert_eq!(state.puts, vec![0]);
        assert_eq!(state.bodies[&0], Vec::<u8>::new());
        assert_eq!(state.completes.len(), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![UploadProgress::initial(0), UploadProgress::new(0, 0)]
        );
    }

    #[tokio::test]
    async fn two_parts_two_workers_run_side_by_side() {
        let mut api = MockApi::new(8);
        api.put_delay = Duration::from_millis(20);
        let (events, on_progress) = recorder();

        let source = normalize(UploadData::from(pattern(16))).unwrap();
        let registry = CancellationRegistry::new();
        let on_progress: ProgressCallback = Arc::new(on_progress);
        let progress = Arc::new(ProgressAggregator::new(16, 2, Some(on_progress)));
        let job = UploadJob {
            api: &api,
            source: &source,
            registry: &registry,
            progress: &progress,
            workers: 2,
        };
        let request = BeginMultipartUploadRequest {
            size: 16,
            mime: None,
            original_file_name: None,
            path: None,
            metadata: None,
            tags: None,
            protocol: Some(MultipartUploadProtocol::V1_1),
        };

        let file = job.run(&request).await.unwrap();

        assert_eq!(file.etag, "\"final\"");
        assert_eq!(api.peak.load(Ordering::SeqCst), 2);
        let mut puts = lock(&api.state).puts.clone();
        puts.sort_unstable();
        assert_eq!(puts, vec![0, 1]);
        // One 8-byte part per worker.
        assert_eq!(progress.sent_by_worker(), vec![8, 8]);
        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&UploadProgress::new(16, 16)));
        assert_eq!(events.last().map(|p| p.progress), Some(100));
    }

    #[tokio::test]
    async fn many_parts_reassemble_in_order() {
        let mut api = MockApi::new(7);
        api.put_delay = Duration::from_millis(2);
        let api = Arc::new(api);
        let manager = UploadManager::new(api.clone());
        let (events, on_progress) = recorder();
        let data = pattern(65);

        manager
            .upload(
                data.clone(),
                UploadParams::new()
                    .max_concurrent_upload_parts(3)
                    .on_progress(on_progress),
            )
            .await
            .unwrap();

        assert_eq!(api.reassembled(), data);
        assert!(api.peak.load(Ordering::SeqCst) <= 3);

        let mut puts = lock(&api.state).puts.clone();
        puts.sort_unstable();
        assert_eq!(puts, (0..10).collect::<Vec<_>>());

        let events = events.lock().unwrap();
        assert!(events.windows(2).all(|w| w[0].bytes_sent <= w[1].bytes_sent));
        assert_eq!(events.iter().filter(|p| p.bytes_sent == 65).count(), 1);
        assert_eq!(events.last(), Some(&UploadProgress::new(65, 65)));
    }

    #[tokio::test]
    async fn stream_source_uses_one_worker() {
        let mut api = MockApi::new(10);
        api.put_delay = Duration::from_millis(2);
        let api = Arc::new(api);
        let manager = UploadManager::new(api.clone());
        let data = pattern(45);

        let file = manager
            .upload(
                chunked_stream(data.clone(), 3),
                UploadParams::new().size(45).max_concurrent_upload_parts(4),
            )
            .await
            .unwrap();

        assert_eq!(file.size, 45);
        assert_eq!(api.reassembled(), data);
        assert_eq!(api.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stream_longer_than_size_is_cut_short() {
        let api = Arc::new(MockApi::new(10));
        let manager = UploadManager::new(api.clone());
        let data = pattern(40);

        manager
            .upload(chunked_stream(data.clone(), 6), UploadParams::new().size(25))
            .await
            .unwrap();

        assert_eq!(api.reassembled(), data[..25]);
    }

    #[tokio::test]
    async fn stream_without_size_fails_before_network() {
        let api = Arc::new(MockApi::new(10));
        let manager = UploadManager::new(api.clone());

        let err = manager
            .upload(chunked_stream(pattern(10), 4), UploadParams::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::MissingSizeForStream));
        assert!(lock(&api.state).begins.is_empty());
    }

    #[tokio::test]
    async fn short_stream_is_premature_end() {
        let api = Arc::new(MockApi::new(16));
        let manager = UploadManager::new(api.clone());

        let err = manager
            .upload(chunked_stream(pattern(10), 4), UploadParams::new().size(30))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::PrematureEndOfStream));
        assert!(lock(&api.state).completes.is_empty());
    }

    #[tokio::test]
    async fn failed_part_aborts_siblings() {
        let mut api = MockApi::new(8);
        api.hang_part = Some(0);
        api.fail_part = Some(1);
        let api = Arc::new(api);
        let manager = UploadManager::new(api.clone());
        let handle = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&handle);

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            manager.upload(
                pattern(16),
                UploadParams::new()
                    .max_concurrent_upload_parts(2)
                    .on_begin(move |h| *slot.lock().unwrap() = Some(h)),
            ),
        )
        .await
        .expect("sibling should be aborted")
        .unwrap_err();

        assert!(matches!(err, UploadError::PartUploadFailed { part_index: 1, .. }));
        assert!(handle.lock().unwrap().as_ref().unwrap().is_cancelled());
        assert!(lock(&api.state).completes.is_empty());
        assert_eq!(api.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_etag_fails_part() {
        let mut api = MockApi::new(8);
        api.omit_etag_part = Some(0);
        let manager = UploadManager::new(Arc::new(api));

        let err = manager.upload(pattern(8), UploadParams::new()).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::PartUploadFailed { part_index: 0, ref reason } if reason.contains("etag")
        ));
    }

    #[tokio::test]
    async fn caller_token_cancels_in_flight_upload() {
        let mut api = MockApi::new(8);
        api.hang_all = true;
        let api = Arc::new(api);
        let manager = UploadManager::new(api.clone());
        let token = CancellationToken::new();

        let canceller = {
            let (api, token) = (Arc::clone(&api), token.clone());
            tokio::spawn(async move {
                api.put_started.notified().await;
                token.cancel();
            })
        };

        let err = manager
            .upload(pattern(32), UploadParams::new().cancellation_token(token))
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, UploadError::Cancelled));
        assert!(lock(&api.state).completes.is_empty());
    }

    #[tokio::test]
    async fn begin_handle_cancels_upload() {
        let mut api = MockApi::new(8);
        api.hang_all = true;
        let api = Arc::new(api);
        let manager = UploadManager::new(api.clone());
        let started = Arc::clone(&api);

        let err = manager
            .upload(
                pattern(32),
                UploadParams::new().on_begin(move |handle| {
                    tokio::spawn(async move {
                        started.put_started.notified().await;
                        handle.cancel();
                    });
                }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Cancelled));
        assert!(lock(&api.state).completes.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_skips_network() {
        let api = Arc::new(MockApi::new(8));
        let manager = UploadManager::new(api.clone());
        let token = CancellationToken::new();
        token.cancel();

        let err = manager
            .upload(pattern(8), UploadParams::new().cancellation_token(token))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Cancelled));
        assert!(lock(&api.state).begins.is_empty());
    }

    #[tokio::test]
    async fn missing_completed_status_is_protocol_error() {
        let mut api = MockApi::new(8);
        api.never_complete = true;
        let manager = UploadManager::new(Arc::new(api));

        let err = manager.upload(pattern(20), UploadParams::new()).await.unwrap_err();
        assert!(matches!(err, UploadError::Protocol(_)));
    }

    #[tokio::test]
    async fn begin_request_carries_caller_fields() {
        let api = Arc::new(MockApi::new(8));
        let manager = UploadManager::new(api.clone());

        let file = manager
            .upload(
                "hello",
                UploadParams::new()
                    .path("/greetings/hello.txt")
                    .tag("greeting")
                    .metadata(serde_json::json!({ "lang": "en" }))
                    .original_file_name("hello.txt"),
            )
            .await
            .unwrap();

        let state = lock(&api.state);
        let begin = &state.begins[0];
        assert_eq!(begin.size, 5);
        assert_eq!(begin.mime.as_deref(), Some("text/plain"));
        assert_eq!(begin.original_file_name.as_deref(), Some("hello.txt"));
        assert_eq!(begin.tags, Some(vec!["greeting".to_string()]));
        assert_eq!(begin.protocol, Some(MultipartUploadProtocol::V1_1));
        assert_eq!(
            begin.path,
            Some(FilePathDefinition::Absolute("/greetings/hello.txt".into()))
        );
        assert_eq!(file.tags, vec!["greeting".to_string()]);
        assert_eq!(state.completes[0], (0, "\"part-0\"".to_string()));
    }

    #[tokio::test]
    async fn file_path_source_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let data = pattern(30);
        std::fs::write(&path, &data).unwrap();

        let api = Arc::new(MockApi::new(8));
        let manager = UploadManager::new(api.clone());
        manager.upload(path, UploadParams::new()).await.unwrap();

        let begin = lock(&api.state).begins[0].clone();
        assert_eq!(begin.original_file_name.as_deref(), Some("report.json"));
        assert_eq!(begin.mime.as_deref(), Some("application/json"));
        assert_eq!(api.reassembled(), data);
    }

    #[test]
    fn upload_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}
        let manager = UploadManager::new(Arc::new(MockApi::new(8)));
        let fut = manager.upload(Vec::new(), UploadParams::new());
        assert_send(&fut);
    }
}
