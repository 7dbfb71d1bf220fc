use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TransferError;
use crate::source::ByteStream;

/// Pieces buffered between the pipeline and one sub-stream.
const SUB_STREAM_CAPACITY: usize = 4;

/// Future returned by [`ChunkedStream::run_drain_pipeline`].
pub type DrainPipeline = Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send>>;

/// Splits a forward-only stream into consecutive fixed-length sub-streams.
///
/// The underlying source is only polled while a [`take`](Self::take)
/// consumer still needs bytes. Bytes read past the end of one take are
/// buffered and served first to the next take.
///
/// [`run_drain_pipeline`](Self::run_drain_pipeline) must be running for
/// takes that need more than the buffered bytes to make progress.
pub struct ChunkedStream {
    shared: Arc<Shared>,
    source: Mutex<Option<ByteStream>>,
}

struct Shared {
    state: Mutex<State>,
    demand: Notify,
    finished: CancellationToken,
}

#[derive(Default)]
struct State {
    buffer: BytesMut,
    consumer: Option<Consumer>,
    source_ended: bool,
    closed: bool,
}

struct Consumer {
    remaining: u64,
    tx: mpsc::Sender<io::Result<Bytes>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChunkedStream {
    pub fn new(source: ByteStream) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                demand: Notify::new(),
                finished: CancellationToken::new(),
            }),
            source: Mutex::new(Some(source)),
        }
    }

    /// Returns a sub-stream yielding exactly `n` bytes.
    ///
    /// The sub-stream from the previous call must have been drained.
    pub fn take(&self, n: u64) -> Result<SubStream, TransferError> {
        let mut state = lock(&self.shared.state);
        if state.consumer.is_some() {
            return Err(TransferError::PreviousTakeNotDrained);
        }

        let (tx, rx) = mpsc::channel(SUB_STREAM_CAPACITY);
        if n == 0 {
            return Ok(SubStream { rx, len: 0 });
        }

        let from_buffer = (state.buffer.len() as u64).min(n) as usize;
        let remaining = n - from_buffer as u64;

        if remaining > 0 {
            if state.source_ended {
                return Err(TransferError::PrematureEndOfStream);
            }
            if state.closed {
                return Err(TransferError::Closed);
            }
        }

        if from_buffer > 0 {
            let piece = state.buffer.split_to(from_buffer).freeze();
            // Fresh channel, so there is always room for one piece.
            tx.try_send(Ok(piece)).map_err(|_| TransferError::Closed)?;
        }

        if remaining > 0 {
            state.consumer = Some(Consumer { remaining, tx });
            drop(state);
            self.shared.demand.notify_one();
        }

        Ok(SubStream { rx, len: n })
    }

    /// Signals that no more bytes are wanted, even if the source has more.
    pub fn finished_consuming(&self) {
        self.shared.finished.cancel();
    }

    /// Moves bytes from the source into the attached sub-streams.
    ///
    /// Resolves when the source ends or after
    /// [`finished_consuming`](Self::finished_consuming). Fails if the
    /// source errors or ends while a take still needs bytes. The returned
    /// future owns everything it needs and can be spawned.
    pub fn run_drain_pipeline(&self) -> DrainPipeline {
        let source = lock(&self.source).take();
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            let Some(source) = source else {
                return Err(TransferError::Closed);
            };
            let result = shared.drain(source).await;
            shared.close();
            result
        })
    }
}

impl fmt::Debug for ChunkedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("ChunkedStream")
            .field("buffered", &state.buffer.len())
            .field("consumer_attached", &state.consumer.is_some())
            .field("source_ended", &state.source_ended)
            .finish()
    }
}

impl Shared {
    async fn drain(&self, mut source: ByteStream) -> Result<(), TransferError> {
        loop {
            if !self.wait_for_demand().await {
                return Ok(());
            }

            let item = tokio::select! {
                biased;
                _ = self.finished.cancelled() => return Ok(()),
                item = source.next() => item,
            };

            match item {
                None => {
                    let pending = {
                        let mut state = lock(&self.state);
                        state.source_ended = true;
                        state.consumer.take()
                    };
                    return match pending {
                        Some(consumer) => {
                            let err = io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "stream ended before all requested bytes were read",
                            );
                            let _ = consumer.tx.send(Err(err)).await;
                            Err(TransferError::PrematureEndOfStream)
                        }
                        None => Ok(()),
                    };
                }
                Some(Err(e)) => {
                    let pending = lock(&self.state).consumer.take();
                    if let Some(consumer) = pending {
                        let forwarded = io::Error::new(e.kind(), e.to_string());
                        let _ = consumer.tx.send(Err(forwarded)).await;
                    }
                    return Err(TransferError::Io(e));
                }
                Some(Ok(chunk)) => {
                    let Some((tx, piece)) = self.on_data(chunk) else {
                        continue;
                    };
                    tokio::select! {
                        biased;
                        _ = self.finished.cancelled() => return Ok(()),
                        sent = tx.send(Ok(piece)) => {
                            if sent.is_err() {
                                debug!("sub-stream dropped before it was drained");
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Waits until a consumer is attached. Returns `false` once finished.
    async fn wait_for_demand(&self) -> bool {
        loop {
            let notified = self.demand.notified();
            if self.finished.is_cancelled() {
                return false;
            }
            if lock(&self.state).consumer.is_some() {
                return true;
            }
            tokio::select! {
                biased;
                _ = self.finished.cancelled() => return false,
                _ = notified => {}
            }
        }
    }

    /// Routes one chunk from the source. Returns the piece to deliver and
    /// the channel to deliver it on; the rest is buffered.
    fn on_data(&self, mut chunk: Bytes) -> Option<(mpsc::Sender<io::Result<Bytes>>, Bytes)> {
        if chunk.is_empty() {
            return None;
        }

        let mut state = lock(&self.state);
        let Some(mut consumer) = state.consumer.take() else {
            warn!(
                bytes = chunk.len(),
                "stream yielded data while paused; buffering, which can grow without bound"
            );
            state.buffer.extend_from_slice(&chunk);
            return None;
        };

        let wanted = consumer.remaining.min(chunk.len() as u64) as usize;
        let rest = chunk.split_off(wanted);
        if !rest.is_empty() {
            state.buffer.extend_from_slice(&rest);
        }
        consumer.remaining -= wanted as u64;

        let tx = if consumer.remaining > 0 {
            let tx = consumer.tx.clone();
            state.consumer = Some(consumer);
            tx
        } else {
            consumer.tx
        };
        Some((tx, chunk))
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.consumer = None;
    }
}

/// Bytes of one [`ChunkedStream::take`] call.
#[derive(Debug)]
pub struct SubStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    len: u64,
}

impl SubStream {
    /// Number of bytes this sub-stream yields.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Stream for SubStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
