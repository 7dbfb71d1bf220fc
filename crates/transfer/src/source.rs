use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytelift_protocol::UploadPartRange;
use bytes::Bytes;
use futures_util::Stream;
use futures_util::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::chunked::ChunkedStream;
use crate::{BODY_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT_UPLOAD_PARTS, TransferError};

/// MIME type given to text sources.
const TEXT_MIME: &str = "text/plain";

/// A forward-only byte stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Future returned by [`BlobLike::slice`].
pub type SliceFuture<'a> = Pin<Box<dyn Future<Output = io::Result<PartBody>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Blobs
// ---------------------------------------------------------------------------

/// A sized object whose bytes can be read by range.
pub trait BlobLike: Send + Sync {
    fn size(&self) -> u64;

    /// File name to report as `originalFileName`.
    fn name(&self) -> Option<&str>;

    /// MIME type. Empty strings are treated as unknown.
    fn mime(&self) -> Option<&str>;

    /// Reads `start..end`. Callers guarantee `end <= self.size()`.
    fn slice(&self, start: u64, end: u64) -> SliceFuture<'_>;
}

/// An in-memory blob.
#[derive(Debug, Clone)]
pub struct MemoryBlob {
    data: Bytes,
    name: Option<String>,
    mime: Option<String>,
}

impl MemoryBlob {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            name: None,
            mime: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

impl BlobLike for MemoryBlob {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    fn slice(&self, start: u64, end: u64) -> SliceFuture<'_> {
        let bytes = self.data.slice(start as usize..end as usize);
        Box::pin(async move { Ok(PartBody::from_bytes(bytes)) })
    }
}

/// A blob backed by a file on disk. Each slice opens its own handle.
#[derive(Debug, Clone)]
pub struct FileBlob {
    path: PathBuf,
    size: u64,
    name: Option<String>,
    mime: Option<String>,
}

impl FileBlob {
    /// Stats `path`. Fails with `UnsupportedSourceType` if it is not a regular file.
    pub fn from_path(path: &Path) -> Result<Self, TransferError> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(TransferError::UnsupportedSourceType(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            mime: mime_guess::from_path(path).first().map(|m| m.to_string()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobLike for FileBlob {
    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    fn slice(&self, start: u64, end: u64) -> SliceFuture<'_> {
        Box::pin(async move {
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(io::SeekFrom::Start(start)).await?;
            let len = end - start;
            let reader = ReaderStream::with_capacity(file.take(len), BODY_CHUNK_SIZE);
            Ok(PartBody::from_stream(len, Box::pin(reader)))
        })
    }
}

// ---------------------------------------------------------------------------
// PartBody
// ---------------------------------------------------------------------------

/// The bytes of one part, with a known length.
pub struct PartBody {
    len: u64,
    inner: BodyInner,
}

enum BodyInner {
    Bytes(Bytes),
    Stream(ByteStream),
}

impl PartBody {
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            len: bytes.len() as u64,
            inner: BodyInner::Bytes(bytes),
        }
    }

    /// Wraps a stream that yields exactly `len` bytes.
    pub fn from_stream(len: u64, stream: ByteStream) -> Self {
        Self {
            len,
            inner: BodyInner::Stream(stream),
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Converts into a stream. In-memory bodies are split into
    /// [`BODY_CHUNK_SIZE`] pieces so progress advances incrementally.
    pub fn into_stream(self) -> ByteStream {
        match self.inner {
            BodyInner::Stream(s) => s,
            BodyInner::Bytes(bytes) => {
                let mut pieces = Vec::with_capacity(bytes.len().div_ceil(BODY_CHUNK_SIZE));
                let mut rest = bytes;
                while !rest.is_empty() {
                    let n = rest.len().min(BODY_CHUNK_SIZE);
                    pieces.push(Ok(rest.split_to(n)));
                }
                Box::pin(stream::iter(pieces))
            }
        }
    }

    /// Reads the whole body into memory.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        match self.inner {
            BodyInner::Bytes(bytes) => Ok(bytes),
            BodyInner::Stream(mut s) => {
                let mut buf = Vec::with_capacity(self.len as usize);
                while let Some(chunk) = s.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for PartBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            BodyInner::Bytes(_) => "bytes",
            BodyInner::Stream(_) => "stream",
        };
        f.debug_struct("PartBody")
            .field("len", &self.len)
            .field("kind", &kind)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Input accepted by an upload.
pub enum UploadData {
    /// Uploaded as a `text/plain` blob.
    Text(String),
    Blob(Arc<dyn BlobLike>),
    Buffer(Bytes),
    ArrayBuffer(Vec<u8>),
    /// A forward-only stream. The caller must also supply its size.
    Stream(ByteStream),
    /// A regular file on disk.
    Path(PathBuf),
}

impl UploadData {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }

    pub fn blob(blob: impl BlobLike + 'static) -> Self {
        Self::Blob(Arc::new(blob))
    }
}

impl From<String> for UploadData {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for UploadData {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Bytes> for UploadData {
    fn from(b: Bytes) -> Self {
        Self::Buffer(b)
    }
}

impl From<Vec<u8>> for UploadData {
    fn from(v: Vec<u8>) -> Self {
        Self::ArrayBuffer(v)
    }
}

impl From<PathBuf> for UploadData {
    fn from(p: PathBuf) -> Self {
        Self::Path(p)
    }
}

impl fmt::Debug for UploadData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            Self::Blob(b) => f.debug_tuple("Blob").field(&b.size()).finish(),
            Self::Buffer(b) => f.debug_tuple("Buffer").field(&b.len()).finish(),
            Self::ArrayBuffer(v) => f.debug_tuple("ArrayBuffer").field(&v.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
        }
    }
}

/// A normalized upload source.
pub enum UploadSource {
    Blob(Arc<dyn BlobLike>),
    Buffer(Bytes),
    ArrayBuffer(Bytes),
    Stream(ChunkedStream),
}

/// Classifies caller input into one of the four source kinds.
pub fn normalize(data: UploadData) -> Result<UploadSource, TransferError> {
    let source = match data {
        UploadData::Text(text) => {
            UploadSource::Blob(Arc::new(MemoryBlob::new(text).with_mime(TEXT_MIME)))
        }
        UploadData::Blob(blob) => UploadSource::Blob(blob),
        UploadData::Buffer(bytes) => UploadSource::Buffer(bytes),
        UploadData::ArrayBuffer(vec) => UploadSource::ArrayBuffer(Bytes::from(vec)),
        UploadData::Stream(stream) => UploadSource::Stream(ChunkedStream::new(stream)),
        UploadData::Path(path) => UploadSource::Blob(Arc::new(FileBlob::from_path(&path)?)),
    };
    Ok(source)
}

impl UploadSource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Blob(_) => "blob",
            Self::Buffer(_) => "buffer",
            Self::ArrayBuffer(_) => "array_buffer",
            Self::Stream(_) => "stream",
        }
    }

    /// The chunked reader, for stream sources.
    pub fn chunked(&self) -> Option<&ChunkedStream> {
        match self {
            Self::Stream(c) => Some(c),
            _ => None,
        }
    }

    /// Cuts the bytes of one part.
    ///
    /// Stream sources are read sequentially, so parts must be sliced in
    /// index order and each body drained before the next call.
    pub async fn slice(&self, range: UploadPartRange) -> Result<PartBody, TransferError> {
        if range.is_empty() {
            return Ok(PartBody::empty());
        }
        if range.inclusive_start < 0 {
            return Err(TransferError::RangeOutOfBounds {
                start: 0,
                end: range.end_exclusive(),
                size: self.known_size().unwrap_or(0),
            });
        }
        let start = range.inclusive_start as u64;
        let end = range.end_exclusive();

        match self {
            Self::Blob(blob) => {
                check_bounds(start, end, blob.size())?;
                Ok(blob.slice(start, end).await?)
            }
            Self::Buffer(bytes) | Self::ArrayBuffer(bytes) => {
                check_bounds(start, end, bytes.len() as u64)?;
                Ok(PartBody::from_bytes(
                    bytes.slice(start as usize..end as usize),
                ))
            }
            Self::Stream(chunked) => {
                let sub = chunked.take(range.len())?;
                Ok(PartBody::from_stream(range.len(), Box::pin(sub)))
            }
        }
    }

    fn known_size(&self) -> Option<u64> {
        match self {
            Self::Blob(blob) => Some(blob.size()),
            Self::Buffer(b) | Self::ArrayBuffer(b) => Some(b.len() as u64),
            Self::Stream(_) => None,
        }
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSource")
            .field("kind", &self.kind())
            .field("size", &self.known_size())
            .finish()
    }
}

fn check_bounds(start: u64, end: u64, size: u64) -> Result<(), TransferError> {
    if start > end || end > size {
        return Err(TransferError::RangeOutOfBounds { start, end, size });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Caller-supplied values that take precedence over derived metadata.
#[derive(Debug, Clone, Default)]
pub struct SourceOverrides {
    /// Required for stream sources, ignored otherwise.
    pub size: Option<u64>,
    pub mime: Option<String>,
    pub original_file_name: Option<String>,
    pub max_concurrent_upload_parts: Option<usize>,
}

/// Metadata sent with the begin-upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub size: u64,
    pub mime: Option<String>,
    pub original_file_name: Option<String>,
    pub max_concurrent_upload_parts: usize,
}

/// Derives size, MIME type, name and worker count for a source.
pub fn describe(
    source: &UploadSource,
    overrides: &SourceOverrides,
) -> Result<SourceInfo, TransferError> {
    let (size, mime, name, forced_concurrency) = match source {
        UploadSource::Blob(blob) => (
            blob.size(),
            blob.mime().filter(|m| !m.is_empty()).map(str::to_owned),
            blob.name().map(str::to_owned),
            None,
        ),
        UploadSource::Buffer(b) | UploadSource::ArrayBuffer(b) => {
            (b.len() as u64, None, None, None)
        }
        UploadSource::Stream(_) => {
            let size = overrides.size.ok_or(TransferError::MissingSizeForStream)?;
            // A sequential source can only feed one part at a time.
            (size, None, None, Some(1))
        }
    };

    let max_concurrent_upload_parts = forced_concurrency
        .or(overrides.max_concurrent_upload_parts)
        .unwrap_or(DEFAULT_MAX_CONCURRENT_UPLOAD_PARTS)
        .max(1);

    Ok(SourceInfo {
        size,
        mime: overrides.mime.clone().or(mime),
        original_file_name: overrides.original_file_name.clone().or(name),
        max_concurrent_upload_parts,
    })
}
