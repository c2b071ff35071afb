//! # hpdummy
//!
//! A bounded-memory engine for synthetic HTTP and gRPC payloads.
//!
//! Test servers that return large responses usually allocate the response.
//! `hpdummy` never does: every stream borrows one fixed-size buffer from a
//! [`BufferPool`], filled once with a repeating [`pattern`], and writes it out
//! as many times as needed. Memory stays at roughly
//! `concurrent streams * buffer size` whatever the requested payload sizes.
//!
//! ## Pieces
//!
//! - [`pool`]: fixed-size, pattern-filled buffers with RAII checkout.
//! - [`emitter`]: [`StreamDescriptor`] and [`StreamEmitter`], the bulk and
//!   paced write loops.
//! - [`sink`]: the [`ByteSink`] trait and adapters for `AsyncWrite` and
//!   channels.
//! - [`body`]: `http-body` implementations for known-length and chunked
//!   responses.
//! - [`drain`]: the monotonic drain flag, in-flight tracking and the shutdown
//!   supervisor.
//!
//! ## Example
//!
//! ```
//! use hpdummy::{BufferPool, IoSink, StreamDescriptor, StreamEmitter};
//! use std::{num::NonZeroUsize, time::Duration};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pool = BufferPool::new(64 * 1024);
//! let descriptor = StreamDescriptor::chunked(
//!     10 * 1024,
//!     NonZeroUsize::new(1024).unwrap(),
//!     Duration::from_millis(1),
//!     true,
//! );
//!
//! let mut sink = IoSink::new(Vec::new());
//! let written = StreamEmitter::new(descriptor, pool.acquire())
//!     .emit(&mut sink)
//!     .await
//!     .unwrap();
//! assert_eq!(written, 10 * 1024);
//! # }
//! ```

pub mod body;
pub mod drain;
pub mod emitter;
mod error;
pub mod pattern;
pub mod pool;
pub mod sink;

pub use body::{ChunkedBody, KnownLengthBody, emit_chunked, emit_known_length};
pub use drain::{Drain, DrainSupervisor, InflightGuard, ServerExit, ShutdownReport};
pub use emitter::{DEFAULT_CHUNK_SIZE, DeliveryMode, StreamDescriptor, StreamEmitter};
pub use error::{EmitError, Error, Result};
pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use sink::{ByteSink, ChannelSink, IoSink};
