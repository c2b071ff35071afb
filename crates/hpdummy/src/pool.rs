//! Fixed-size pattern buffer pool.
//!
//! Every streaming response borrows exactly one buffer from a [`BufferPool`]
//! and writes it out repeatedly, so the memory used by a stream is one buffer
//! no matter how many bytes it emits. Buffers are created lazily on a pool
//! miss, filled once with [`pattern::ALPHABET`](crate::pattern::ALPHABET), and
//! then reused for the lifetime of the process.
//!
//! ## Ownership
//!
//! A checked-out buffer is a [`PooledBuffer`]. Holding it is exclusive use;
//! dropping it (or calling [`PooledBuffer::release`]) is the only way back into
//! the free list, which makes a double release impossible. Buffer contents are
//! immutable [`Bytes`], so slices handed to a transport may outlive the
//! checkout without any request data ever leaking into a shared buffer.
//!
//! ## Global pool
//!
//! The server configures a single process-wide pool with [`initialize`] before
//! accepting connections and reaches it through [`global`]. Tests and embedders
//! can build private pools with [`BufferPool::new`].

use crate::{
    Error, Result,
    pattern::{self, ALPHABET},
};
use bytes::Bytes;
use core::ops::{Deref, Range};
use parking_lot::Mutex;
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicUsize, Ordering},
};

/// Smallest buffer size accepted by [`initialize`].
pub const MIN_BUFFER_SIZE: usize = 64 * 1024;

/// Largest buffer size accepted by [`initialize`].
pub const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Upper bound on idle buffers kept in the free list. Returns beyond this are
/// dropped; acquisition is never limited.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Buffers created by [`initialize`] before the first request arrives.
pub const PREWARM_BUFFERS: usize = 10;

static GLOBAL: OnceLock<BufferPool> = OnceLock::new();

/// Configures the process-wide pool.
///
/// Must be called exactly once, before any request is served.
///
/// # Errors
///
/// - [`Error::InvalidBufferSize`] if `buffer_size` is outside
///   [`MIN_BUFFER_SIZE`]..=[`MAX_BUFFER_SIZE`].
/// - [`Error::PoolAlreadyInitialized`] on a second call.
pub fn initialize(buffer_size: usize) -> Result<&'static BufferPool> {
    validate_buffer_size(buffer_size)?;

    let pool = BufferPool::new(buffer_size);
    GLOBAL
        .set(pool)
        .map_err(|_| Error::PoolAlreadyInitialized)?;

    let pool = global()?;
    pool.prewarm(PREWARM_BUFFERS);

    tracing::debug!(
        buffer_size,
        prewarmed = PREWARM_BUFFERS,
        "Streaming buffer pool initialized"
    );
    Ok(pool)
}

/// Returns the process-wide pool configured by [`initialize`].
///
/// # Errors
///
/// Returns [`Error::PoolNotInitialized`] if [`initialize`] has not run.
pub fn global() -> Result<&'static BufferPool> {
    GLOBAL.get().ok_or(Error::PoolNotInitialized)
}

/// Checks `buffer_size` against the supported range.
///
/// # Errors
///
/// Returns [`Error::InvalidBufferSize`] when out of range.
pub const fn validate_buffer_size(buffer_size: usize) -> Result<()> {
    if buffer_size < MIN_BUFFER_SIZE || buffer_size > MAX_BUFFER_SIZE {
        return Err(Error::InvalidBufferSize {
            size: buffer_size,
            min: MIN_BUFFER_SIZE,
            max: MAX_BUFFER_SIZE,
        });
    }
    Ok(())
}

/// Point-in-time counters for a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub buffer_size: usize,
    /// Buffers allocated since the pool was built.
    pub created: usize,
    /// Buffers currently waiting in the free list.
    pub idle: usize,
}

struct PoolInner {
    buffer_size: usize,
    max_idle: usize,
    created: AtomicUsize,
    free: Mutex<Vec<Bytes>>,
}

impl PoolInner {
    fn allocate(&self) -> Bytes {
        self.created.fetch_add(1, Ordering::Relaxed);
        Bytes::from(pattern::generate(self.buffer_size, ALPHABET))
    }

    fn put(&self, bytes: Bytes) {
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(bytes);
        }
    }
}

/// A cache of same-size, pattern-filled buffers.
///
/// Cloning is cheap and yields a handle to the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates an empty pool of `buffer_size` byte buffers.
    ///
    /// No range check is applied here; see [`validate_buffer_size`].
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is zero.
    pub fn new(buffer_size: usize) -> Self {
        Self::with_max_idle(buffer_size, DEFAULT_MAX_IDLE)
    }

    /// Creates an empty pool that retains at most `max_idle` free buffers.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is zero.
    pub fn with_max_idle(buffer_size: usize, max_idle: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be non-zero");
        Self {
            inner: Arc::new(PoolInner {
                buffer_size,
                max_idle,
                created: AtomicUsize::new(0),
                free: Mutex::new(Vec::with_capacity(max_idle.min(PREWARM_BUFFERS * 4))),
            }),
        }
    }

    /// Size in bytes of every buffer handed out by this pool.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Checks out a buffer, allocating a new one if the free list is empty.
    ///
    /// Never blocks beyond the free-list lock and never fails.
    pub fn acquire(&self) -> PooledBuffer {
        let reused = self.inner.free.lock().pop();
        let bytes = reused.unwrap_or_else(|| self.inner.allocate());
        PooledBuffer {
            bytes: Some(bytes),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Allocates `count` buffers and parks them in the free list so the first
    /// requests do not pay for pattern filling.
    pub fn prewarm(&self, count: usize) {
        let buffers: Vec<_> = (0..count).map(|_| self.acquire()).collect();
        drop(buffers);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            buffer_size: self.inner.buffer_size,
            created: self.inner.created.load(Ordering::Relaxed),
            idle: self.inner.free.lock().len(),
        }
    }
}

/// Exclusive checkout of one pool buffer.
///
/// Dereferences to the read-only pattern bytes. Returned to its pool exactly
/// once, on [`release`](Self::release) or drop.
pub struct PooledBuffer {
    bytes: Option<Bytes>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    pub fn capacity(&self) -> usize {
        self.bytes().len()
    }

    /// Zero-copy view of `range` of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Bytes {
        self.bytes().slice(range)
    }

    /// Returns the buffer to its pool.
    pub fn release(self) {
        drop(self);
    }

    fn bytes(&self) -> &Bytes {
        // Only `Drop` takes the bytes out.
        self.bytes.as_ref().map_or(&EMPTY, |b| b)
    }
}

static EMPTY: Bytes = Bytes::from_static(&[]);

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes()
    }
}

impl core::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let stats = self.stats();
        f.debug_struct("BufferPool")
            .field("buffer_size", &stats.buffer_size)
            .field("created", &stats.created)
            .field("idle", &stats.idle)
            .finish()
    }
}

impl core::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(bytes) = self.bytes.take() {
            self.pool.put(bytes);
        }
    }
}
