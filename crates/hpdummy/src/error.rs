//! Error types for the streaming engine.
//!
//! Two families of failure exist:
//!
//! - [`Error`]: configuration problems discovered at startup (bad buffer size,
//!   pool initialised twice or not at all). These are fatal; the process must
//!   not start serving.
//! - [`EmitError`]: a transport write failed part way through a stream. The
//!   stream is aborted, never retried, and its buffer goes back to the pool.

use std::io;

pub type Result<T> = core::result::Result<T, Error>;

/// Startup configuration errors.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The requested buffer size is outside the supported range.
    #[error("buffer size must be between {min} and {max} bytes, got {size}")]
    InvalidBufferSize { size: usize, min: usize, max: usize },

    /// [`initialize`](crate::pool::initialize) was called more than once.
    #[error("buffer pool is already initialized")]
    PoolAlreadyInitialized,

    /// The global pool was used before [`initialize`](crate::pool::initialize).
    #[error("buffer pool is not initialized")]
    PoolNotInitialized,
}

/// A stream was cut short by the sink.
///
/// `written` is the number of bytes the sink accepted before the failure, so
/// callers can log how far the peer got.
#[derive(thiserror::Error, Debug)]
#[error("stream aborted after {written} bytes: {source}")]
pub struct EmitError {
    pub written: u64,
    #[source]
    pub source: io::Error,
}

impl EmitError {
    pub(crate) const fn new(written: u64, source: io::Error) -> Self {
        Self { written, source }
    }

    /// Whether the peer simply went away (reset, broken pipe, closed body).
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self.source.kind(),
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
        )
    }
}
