//! Destinations a stream can be written into.

use bytes::Bytes;
use std::{future::Future, io};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

/// A byte destination with an explicit flush.
///
/// `write` hands a block to the sink; `flush` returns once everything written
/// so far has been pushed towards the peer. Implementations must not buffer
/// past what the caller asked for, so a flush per chunk stays observable on the
/// wire.
pub trait ByteSink: Send {
    fn write(&mut self, bytes: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Adapts any [`AsyncWrite`] (socket, file, `Vec<u8>`).
#[derive(Debug)]
pub struct IoSink<W> {
    inner: W,
}

impl<W> IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W> ByteSink for IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: Bytes) -> io::Result<()> {
        self.inner.write_all(&bytes).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}

/// Feeds an HTTP body through a bounded channel.
///
/// Each write becomes exactly one body frame. With a channel capacity of one,
/// `flush` waits until the transport has pulled the previous frame, which is
/// the closest an async body gets to "pushed to the socket".
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub const fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

fn body_dropped() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped")
}

impl ByteSink for ChannelSink {
    async fn write(&mut self, bytes: Bytes) -> io::Result<()> {
        self.tx.send(bytes).await.map_err(|_| body_dropped())
    }

    async fn flush(&mut self) -> io::Result<()> {
        // Capacity is one: a free slot means the last frame was taken.
        self.tx.reserve().await.map(drop).map_err(|_| body_dropped())
    }
}
