//! Transport-agnostic building blocks for multipart uploads.
//!
//! Normalizes caller input into an [`UploadSource`], splits sequential
//! streams into fixed-length runs, aggregates per-worker progress and
//! propagates cancellation to in-flight work.

mod cancel;
mod chunked;
mod mutex;
mod progress;
mod source;

pub use cancel::{CancelHandle, CancellationRegistry, HandlerGuard};
pub use chunked::{ChunkedStream, DrainPipeline, SubStream};
pub use mutex::ExclusiveLock;
pub use progress::{ProgressAggregator, ProgressCallback, ProgressStream, SpeedCalculator};
pub use source::{
    BlobLike, ByteStream, FileBlob, MemoryBlob, PartBody, SliceFuture, SourceInfo,
    SourceOverrides, UploadData, UploadSource, describe, normalize,
};

/// Size of the pieces an in-memory part body is streamed in.
///
/// Smaller pieces give finer-grained progress at the cost of more polls.
pub const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// Worker count used when neither the caller nor the source decides.
pub const DEFAULT_MAX_CONCURRENT_UPLOAD_PARTS: usize = 4;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported source type: {0}")]
    UnsupportedSourceType(String),

    #[error("stream sources require an explicit size")]
    MissingSizeForStream,

    #[error("byte range {start}..{end} is outside the source ({size} bytes)")]
    RangeOutOfBounds { start: u64, end: u64, size: u64 },

    #[error("previous take() has not been drained")]
    PreviousTakeNotDrained,

    #[error("stream ended before all requested bytes were read")]
    PrematureEndOfStream,

    #[error("chunked stream is closed")]
    Closed,

    #[error("cancelled")]
    Cancelled,
}
