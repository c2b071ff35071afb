//! Stream emission: turning one pooled buffer into an arbitrarily long stream.
//!
//! A [`StreamEmitter`] owns a [`PooledBuffer`] and a [`StreamDescriptor`] and
//! writes exactly `total_size` bytes into a [`ByteSink`]. Two code paths exist:
//!
//! - **Bulk** (no delay, no per-chunk flush): the whole buffer is written
//!   repeatedly, then one partial write covers the remainder and a single flush
//!   ends the stream. No chunk bookkeeping happens on this path.
//! - **Paced** (delay and/or per-chunk flush): the total is cut into
//!   `ceil(total_size / chunk_size)` chunks. The task sleeps `delay` before
//!   every chunk except the first, writes the chunk, and flushes after it when
//!   requested. A final flush is always issued.
//!
//! ## Chunk content
//!
//! Every paced chunk starts at buffer offset 0. A chunk longer than the buffer
//! is written as whole-buffer writes followed by a prefix for the remainder.
//! Bulk output is the buffer repeated end to end.
//!
//! ## Errors
//!
//! The first failed write or flush aborts the stream with an [`EmitError`]; it
//! is never retried. Because [`StreamEmitter::emit`] consumes the emitter, the
//! buffer is returned to the pool exactly once whichever way the stream ends.

use crate::{EmitError, pool::PooledBuffer, sink::ByteSink};
use core::{num::NonZeroUsize, time::Duration};
use std::io;

/// Chunk size used when a caller does not choose one.
pub const DEFAULT_CHUNK_SIZE: NonZeroUsize = NonZeroUsize::new(1024).unwrap();

/// Which algorithm a descriptor selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    Bulk,
    Paced,
}

/// Shape of one emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Bytes to emit in total.
    pub total_size: u64,
    /// Bytes per chunk in paced mode.
    pub chunk_size: NonZeroUsize,
    /// Pause before each chunk after the first.
    pub delay: Duration,
    /// Flush the sink after every chunk.
    pub flush_each_chunk: bool,
}

impl StreamDescriptor {
    /// A bulk stream with no pacing.
    pub const fn known_length(total_size: u64, chunk_size: NonZeroUsize) -> Self {
        Self {
            total_size,
            chunk_size,
            delay: Duration::ZERO,
            flush_each_chunk: false,
        }
    }

    pub const fn chunked(
        total_size: u64,
        chunk_size: NonZeroUsize,
        delay: Duration,
        flush_each_chunk: bool,
    ) -> Self {
        Self {
            total_size,
            chunk_size,
            delay,
            flush_each_chunk,
        }
    }

    pub const fn mode(&self) -> DeliveryMode {
        if self.delay.is_zero() && !self.flush_each_chunk {
            DeliveryMode::Bulk
        } else {
            DeliveryMode::Paced
        }
    }

    /// `ceil(total_size / chunk_size)`.
    pub const fn total_chunks(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size.get() as u64)
    }

    /// Size of the final chunk, or 0 for an empty stream.
    pub const fn last_chunk_size(&self) -> u64 {
        let chunks = self.total_chunks();
        if chunks == 0 {
            return 0;
        }
        self.total_size - (chunks - 1) * self.chunk_size.get() as u64
    }
}

/// Drives one stream from a borrowed buffer into a sink.
#[derive(Debug)]
pub struct StreamEmitter {
    descriptor: StreamDescriptor,
    buffer: PooledBuffer,
    label: &'static str,
    written: u64,
}

impl StreamEmitter {
    pub fn new(descriptor: StreamDescriptor, buffer: PooledBuffer) -> Self {
        Self {
            descriptor,
            buffer,
            label: "stream",
            written: 0,
        }
    }

    /// Tag attached to log events of this stream (e.g. `"bin"`, `"chunked"`).
    #[must_use]
    pub const fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub const fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Writes the whole stream into `sink` and returns the byte count.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError`] on the first failed write or flush; the error
    /// carries how many bytes the sink accepted.
    pub async fn emit<S: ByteSink>(mut self, sink: &mut S) -> Result<u64, EmitError> {
        match self.descriptor.mode() {
            DeliveryMode::Bulk => self.emit_bulk(sink).await,
            DeliveryMode::Paced => self.emit_paced(sink).await,
        }
    }

    async fn emit_bulk<S: ByteSink>(&mut self, sink: &mut S) -> Result<u64, EmitError> {
        let capacity = self.buffer.capacity() as u64;
        let whole = self.buffer.slice(0..self.buffer.capacity());

        while self.remaining() >= capacity {
            if let Err(e) = sink.write(whole.clone()).await {
                return Err(self.fail(e, "write", None));
            }
            self.written += capacity;
        }

        let tail = self.remaining();
        if tail > 0 {
            if let Err(e) = sink.write(self.buffer.slice(0..tail as usize)).await {
                return Err(self.fail(e, "write", None));
            }
            self.written += tail;
        }

        if let Err(e) = sink.flush().await {
            return Err(self.fail(e, "final flush", None));
        }
        Ok(self.written)
    }

    async fn emit_paced<S: ByteSink>(&mut self, sink: &mut S) -> Result<u64, EmitError> {
        let StreamDescriptor {
            chunk_size,
            delay,
            flush_each_chunk,
            ..
        } = self.descriptor;
        let total_chunks = self.descriptor.total_chunks();
        let capacity = self.buffer.capacity() as u64;

        for index in 0..total_chunks {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let chunk_len = (chunk_size.get() as u64).min(self.remaining());
            let mut chunk_written = 0;
            while chunk_written < chunk_len {
                let n = (chunk_len - chunk_written).min(capacity);
                if let Err(e) = sink.write(self.buffer.slice(0..n as usize)).await {
                    return Err(self.fail(e, "write", Some((index, total_chunks))));
                }
                chunk_written += n;
                self.written += n;
            }

            if flush_each_chunk {
                if let Err(e) = sink.flush().await {
                    return Err(self.fail(e, "flush", Some((index, total_chunks))));
                }
            }
        }

        if let Err(e) = sink.flush().await {
            return Err(self.fail(e, "final flush", None));
        }
        Ok(self.written)
    }

    const fn remaining(&self) -> u64 {
        self.descriptor.total_size - self.written
    }

    fn fail(&self, source: io::Error, op: &'static str, chunk: Option<(u64, u64)>) -> EmitError {
        report_failure(self.label, self.written, source, op, chunk)
    }
}

/// Logs a failed write or flush and wraps it as an [`EmitError`].
///
/// A departed peer is logged at debug; anything else is a warning.
pub(crate) fn report_failure(
    label: &'static str,
    written: u64,
    source: io::Error,
    op: &'static str,
    chunk: Option<(u64, u64)>,
) -> EmitError {
    let err = EmitError::new(written, source);
    match chunk {
        Some((index, total_chunks)) if !err.is_disconnect() => tracing::warn!(
            label,
            chunk = index + 1,
            total_chunks,
            written,
            error = %err.source,
            "[{label}] {op} error"
        ),
        None if !err.is_disconnect() => tracing::warn!(
            label,
            written,
            error = %err.source,
            "[{label}] {op} error"
        ),
        _ => tracing::debug!(
            label,
            written,
            error = %err.source,
            "[{label}] peer went away during {op}"
        ),
    }
    err
}
