use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::{Duration, Instant};

use bytelift_protocol::UploadProgress;
use bytes::Bytes;
use futures_util::Stream;

/// Callback invoked with aggregate upload progress.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ProgressAggregator
// ---------------------------------------------------------------------------

/// Combines per-worker byte counters into one progress signal.
///
/// Each worker reports the cumulative bytes sent for its current part;
/// the aggregator turns those into deltas. The reported total never
/// decreases, never exceeds `bytes_total`, and an event is only raised
/// when the total changes. The callback runs under an internal lock so
/// events arrive in order; it must not call back into the aggregator.
pub struct ProgressAggregator {
    bytes_total: u64,
    callback: Option<ProgressCallback>,
    inner: Mutex<AggregatorInner>,
}

struct AggregatorInner {
    sent_for_part: Vec<u64>,
    sent_by_worker: Vec<u64>,
    last_emitted: Option<u64>,
}

impl ProgressAggregator {
    pub fn new(bytes_total: u64, workers: usize, callback: Option<ProgressCallback>) -> Self {
        Self {
            bytes_total,
            callback,
            inner: Mutex::new(AggregatorInner {
                sent_for_part: vec![0; workers],
                sent_by_worker: vec![0; workers],
                last_emitted: None,
            }),
        }
    }

    /// Raises the `{0, total, 0}` event sent before any network call.
    pub fn initial(&self) -> UploadProgress {
        let event = UploadProgress::initial(self.bytes_total);
        if let Some(cb) = &self.callback {
            cb(event);
        }
        event
    }

    /// Resets the part counter of `worker` before it starts a new part.
    pub fn begin_part(&self, worker: usize) {
        let mut inner = lock(&self.inner);
        if let Some(slot) = inner.sent_for_part.get_mut(worker) {
            *slot = 0;
        }
    }

    /// Records that `worker` has sent `sent_for_part` bytes of its current part.
    pub fn on_part_progress(&self, worker: usize, sent_for_part: u64) {
        let mut inner = lock(&self.inner);
        let Some(last) = inner.sent_for_part.get(worker).copied() else {
            return;
        };

        // Transports may restate an earlier count; only forward motion counts.
        let delta = sent_for_part.saturating_sub(last);
        inner.sent_for_part[worker] = last + delta;
        inner.sent_by_worker[worker] += delta;

        let total = inner.sent_by_worker.iter().sum::<u64>().min(self.bytes_total);
        if inner.last_emitted == Some(total) {
            return;
        }
        inner.last_emitted = Some(total);

        if let Some(cb) = &self.callback {
            cb(UploadProgress::new(total, self.bytes_total));
        }
    }

    /// Reports the exact part length once a part has been accepted.
    pub fn finish_part(&self, worker: usize, part_len: u64) {
        self.on_part_progress(worker, part_len);
    }

    /// Bytes reported so far across all workers.
    pub fn bytes_sent(&self) -> u64 {
        let inner = lock(&self.inner);
        inner
            .sent_by_worker
            .iter()
            .sum::<u64>()
            .min(self.bytes_total)
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    /// Bytes reported by each worker, indexed by worker.
    pub fn sent_by_worker(&self) -> Vec<u64> {
        lock(&self.inner).sent_by_worker.clone()
    }
}

// ---------------------------------------------------------------------------
// ProgressStream
// ---------------------------------------------------------------------------

/// Stream adapter that reports the cumulative bytes yielded so far.
pub struct ProgressStream<S> {
    inner: S,
    sent: u64,
    on_progress: Box<dyn FnMut(u64) + Send>,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, on_progress: impl FnMut(u64) + Send + 'static) -> Self {
        Self {
            inner,
            sent: 0,
            on_progress: Box::new(on_progress),
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(Pin::new(&mut this.inner).poll_next(cx));
        if let Some(Ok(chunk)) = &item {
            this.sent += chunk.len() as u64;
            (this.on_progress)(this.sent);
        }
        Poll::Ready(item)
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = lock(&self.inner);
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window. 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = lock(&self.inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }

        // The first sample marks the start of the window.
        let total_bytes: u64 = s.samples.iter().skip(1).map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to transfer `remaining_bytes`, or `None` while the speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}
