//! HTTP response bodies backed by pooled buffers.
//!
//! - [`KnownLengthBody`] is pulled by the transport. It reports an exact size
//!   (so the response carries `Content-Length`) and hands out zero-copy slices
//!   of the buffer, wrapping around as often as needed. [`KnownLengthBody::write_to`]
//!   is the bulk hand-off for callers that own a sink instead.
//! - [`ChunkedBody`] is pushed by a [`StreamEmitter`] running on its own task.
//!   Every sink write becomes one body frame, so per-chunk flushes survive all
//!   the way to the transport.
//!
//! Both bodies return their buffer to the pool when the stream ends or when
//! the body is dropped early. [`KnownLengthBody::on_complete`] and
//! [`ChunkedBody::on_complete`] report how many bytes actually left.

use crate::{
    EmitError,
    drain::InflightGuard,
    emitter::{StreamDescriptor, StreamEmitter, report_failure},
    pool::{BufferPool, PooledBuffer},
    sink::{ByteSink, ChannelSink},
};
use bytes::Bytes;
use core::{
    convert::Infallible,
    fmt,
    num::NonZeroUsize,
    pin::Pin,
    task::{Context, Poll, ready},
};
use http_body::{Body, Frame, SizeHint};
use std::io;
use tokio::sync::mpsc;

const KNOWN_LENGTH_LABEL: &str = "known-length";

/// Runs once, with the bytes a body handed to the transport.
struct Completion(Box<dyn FnOnce(u64) + Send>);

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

/// Starts a `Content-Length` stream of `total_size` pattern bytes.
///
/// `chunk_size` only matters if the body is later handed to a sink with
/// [`KnownLengthBody::write_to`]; the pull path always yields buffer-sized
/// slices.
pub fn emit_known_length(
    pool: &BufferPool,
    total_size: u64,
    chunk_size: NonZeroUsize,
) -> KnownLengthBody {
    KnownLengthBody::new(
        pool.acquire(),
        StreamDescriptor::known_length(total_size, chunk_size),
    )
}

/// Spawns an emitter for `descriptor` and returns the body it feeds.
///
/// With `flush_each_chunk`, a chunk no larger than the pool's buffer is exactly
/// one frame. A longer chunk is cut into frames of at most the buffer size,
/// so callers that promise one frame per chunk must cap `chunk_size` at
/// [`BufferPool::buffer_size`].
///
/// Must be called from within a Tokio runtime.
pub fn emit_chunked(
    pool: &BufferPool,
    descriptor: StreamDescriptor,
    label: &'static str,
) -> ChunkedBody {
    let (tx, rx) = mpsc::channel(1);
    let emitter = StreamEmitter::new(descriptor, pool.acquire()).with_label(label);

    tokio::spawn(async move {
        let mut sink = ChannelSink::new(tx);
        match emitter.emit(&mut sink).await {
            Ok(written) => tracing::debug!(label, written, "[{label}] stream complete"),
            // already logged by the emitter
            Err(EmitError { .. }) => {}
        }
    });

    ChunkedBody {
        rx,
        expected: descriptor.total_size,
        received: 0,
        done: false,
        guard: None,
        on_complete: None,
    }
}

/// Pull-based body of exactly `total` bytes.
#[derive(Debug)]
pub struct KnownLengthBody {
    buffer: Option<PooledBuffer>,
    descriptor: StreamDescriptor,
    total: u64,
    cursor: u64,
    guard: Option<InflightGuard>,
    on_complete: Option<Completion>,
}

impl KnownLengthBody {
    pub fn new(buffer: PooledBuffer, descriptor: StreamDescriptor) -> Self {
        let total = descriptor.total_size;
        let mut body = Self {
            buffer: Some(buffer),
            descriptor,
            total,
            cursor: 0,
            guard: None,
            on_complete: None,
        };
        if total == 0 {
            body.finish();
        }
        body
    }

    /// Keeps `guard` alive until the body ends or is dropped.
    #[must_use]
    pub fn tracked(mut self, guard: InflightGuard) -> Self {
        if self.buffer.is_some() {
            self.guard = Some(guard);
        }
        self
    }

    /// Calls `f` with the bytes delivered when the body is dropped, whether
    /// it finished or the client left early.
    #[must_use]
    pub fn on_complete(mut self, f: impl FnOnce(u64) + Send + 'static) -> Self {
        self.on_complete = Some(Completion(Box::new(f)));
        self
    }

    pub const fn remaining(&self) -> u64 {
        self.total - self.cursor
    }

    /// Next slice, starting where the previous one ended in the buffer.
    fn next_block(&mut self) -> Option<Bytes> {
        let buffer = self.buffer.as_ref()?;
        let capacity = buffer.capacity() as u64;
        let offset = self.cursor % capacity;
        let len = self.remaining().min(capacity - offset);
        let block = buffer.slice(offset as usize..(offset + len) as usize);

        self.cursor += len;
        if self.cursor == self.total {
            self.finish();
        }
        Some(block)
    }

    fn finish(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.release();
        }
        self.guard = None;
    }

    /// Writes the rest of the body into `sink` and flushes once.
    ///
    /// An untouched body goes through the bulk emitter; a partly pulled one
    /// continues where the transport stopped. Either way the bytes match what
    /// [`Body::poll_frame`] would have produced.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError`] on the first failed write or flush.
    pub async fn write_to<S: ByteSink>(mut self, sink: &mut S) -> Result<u64, EmitError> {
        if self.cursor == 0 {
            if let Some(buffer) = self.buffer.take() {
                let _guard = self.guard.take();
                let result = StreamEmitter::new(self.descriptor, buffer)
                    .with_label(KNOWN_LENGTH_LABEL)
                    .emit(sink)
                    .await;
                self.cursor = match &result {
                    Ok(written) => *written,
                    Err(e) => e.written,
                };
                return result;
            }
        }

        let mut written = 0;
        while let Some(block) = self.next_block() {
            let len = block.len() as u64;
            if let Err(e) = sink.write(block).await {
                self.cursor -= len;
                return Err(report_failure(KNOWN_LENGTH_LABEL, written, e, "write", None));
            }
            written += len;
        }
        if let Err(e) = sink.flush().await {
            return Err(report_failure(KNOWN_LENGTH_LABEL, written, e, "final flush", None));
        }
        Ok(written)
    }
}

impl Drop for KnownLengthBody {
    fn drop(&mut self) {
        if let Some(Completion(f)) = self.on_complete.take() {
            f(self.cursor);
        }
    }
}

impl Body for KnownLengthBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.next_block().map(|b| Ok(Frame::data(b))))
    }

    fn is_end_stream(&self) -> bool {
        self.cursor >= self.total
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining())
    }
}

/// Push-based body fed by a spawned emitter.
///
/// If the emitter stops before `expected` bytes arrived the body yields an
/// error, so the transport aborts the response instead of terminating it
/// cleanly.
#[derive(Debug)]
pub struct ChunkedBody {
    rx: mpsc::Receiver<Bytes>,
    expected: u64,
    received: u64,
    done: bool,
    guard: Option<InflightGuard>,
    on_complete: Option<Completion>,
}

impl ChunkedBody {
    /// Keeps `guard` alive until the body ends or is dropped.
    #[must_use]
    pub fn tracked(mut self, guard: InflightGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Calls `f` with the bytes handed to the transport when the body is
    /// dropped.
    #[must_use]
    pub fn on_complete(mut self, f: impl FnOnce(u64) + Send + 'static) -> Self {
        self.on_complete = Some(Completion(Box::new(f)));
        self
    }
}

impl Drop for ChunkedBody {
    fn drop(&mut self) {
        if let Some(Completion(f)) = self.on_complete.take() {
            f(self.received);
        }
    }
}

impl Body for ChunkedBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.done {
            return Poll::Ready(None);
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(bytes) => {
                self.received += bytes.len() as u64;
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            None => {
                self.done = true;
                self.guard = None;
                if self.received < self.expected {
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "stream ended after {} of {} bytes",
                            self.received, self.expected
                        ),
                    ))))
                } else {
                    Poll::Ready(None)
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        // No exact hint, otherwise the transport would set Content-Length.
        let mut hint = SizeHint::new();
        hint.set_upper(self.expected - self.received.min(self.expected));
        hint
    }
}
