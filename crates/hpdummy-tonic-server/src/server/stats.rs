//! Periodic resource report: pool buffers and in-flight streams.

use core::time::Duration;
use hpdummy::{BufferPool, Drain, PoolStats};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub pool: PoolStats,
    pub inflight: usize,
    pub draining: bool,
}

impl Snapshot {
    pub fn take(pool: &BufferPool, drain: &Drain) -> Self {
        Self {
            pool: pool.stats(),
            inflight: drain.inflight(),
            draining: drain.is_draining(),
        }
    }

    /// Bytes held by every buffer the pool has allocated.
    pub const fn pool_bytes(&self) -> usize {
        self.pool.created.saturating_mul(self.pool.buffer_size)
    }

    fn log(&self) {
        tracing::info!(
            buffers_created = self.pool.created,
            buffers_idle = self.pool.idle,
            pool_bytes = self.pool_bytes(),
            inflight = self.inflight,
            draining = self.draining,
            "stats"
        );
    }
}

/// Logs a [`Snapshot`] every `interval` until `stop` fires.
pub async fn run(pool: BufferPool, drain: Drain, interval: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => Snapshot::take(&pool, &drain).log(),
        }
    }
}

pub fn spawn(
    pool: BufferPool,
    drain: Drain,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(pool, drain, interval, stop))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_pool_and_drain() {
        let pool = BufferPool::new(64 * 1024);
        let drain = Drain::new();
        let buffer = pool.acquire();
        let guard = drain.track();

        let snapshot = Snapshot::take(&pool, &drain);
        assert_eq!(snapshot.pool.created, 1);
        assert_eq!(snapshot.pool.idle, 0);
        assert_eq!(snapshot.inflight, 1);
        assert!(!snapshot.draining);
        assert_eq!(snapshot.pool_bytes(), 64 * 1024);

        drop(buffer);
        drop(guard);
        drain.begin_drain();
        let snapshot = Snapshot::take(&pool, &drain);
        assert_eq!(snapshot.pool.idle, 1);
        assert_eq!(snapshot.inflight, 0);
        assert!(snapshot.draining);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_token() {
        let stop = CancellationToken::new();
        let handle = spawn(
            BufferPool::new(64 * 1024),
            Drain::new(),
            Duration::from_secs(10),
            stop.clone(),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!handle.is_finished());

        stop.cancel();
        handle.await.unwrap();
    }
}
