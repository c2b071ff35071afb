//! Graceful drain coordination.
//!
//! [`Drain`] is a process-wide, monotonic "stop accepting new work" flag shared
//! by every front end. Request handlers check [`Drain::is_draining`] before
//! admitting work and hold an [`InflightGuard`] while they run; long-lived
//! streams can also await [`Drain::draining`] to end early.
//!
//! [`DrainSupervisor`] runs the shutdown sequence once a stop signal arrives:
//!
//! 1. flip the flag (new work is rejected from here on),
//! 2. wait out the grace period so load balancers notice,
//! 3. tell every server to stop accepting connections,
//! 4. join the servers in parallel, each bounded by the shutdown timeout,
//!    force-aborting any that overrun.
//!
//! In-flight streams are never truncated by the flag itself; only the server
//! timeout bounds them.

use core::{
    fmt,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};
use futures::future::join_all;
use std::sync::{Arc, OnceLock};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

static GLOBAL: OnceLock<Drain> = OnceLock::new();

#[derive(Debug, Default)]
struct DrainInner {
    draining: AtomicBool,
    notify: CancellationToken,
    inflight: AtomicUsize,
}

/// Shared drain flag plus an in-flight work counter.
#[derive(Clone, Debug, Default)]
pub struct Drain {
    inner: Arc<DrainInner>,
}

impl Drain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that starts out draining. Useful for tests.
    pub fn already_draining() -> Self {
        let drain = Self::new();
        drain.begin_drain();
        drain
    }

    /// The process-wide handle.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Flips the flag. Returns `true` only for the call that flipped it.
    ///
    /// There is no way back: once draining, always draining.
    pub fn begin_drain(&self) -> bool {
        let first = !self.inner.draining.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.cancel();
        }
        first
    }

    /// Resolves once draining has begun.
    pub async fn draining(&self) {
        self.inner.notify.cancelled().await;
    }

    /// Registers a unit of in-flight work until the guard is dropped.
    pub fn track(&self) -> InflightGuard {
        self.inner.inflight.fetch_add(1, Ordering::AcqRel);
        InflightGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn inflight(&self) -> usize {
        self.inner.inflight.load(Ordering::Acquire)
    }
}

/// Decrements the in-flight counter on drop.
#[must_use = "the work is untracked as soon as the guard is dropped"]
#[derive(Debug)]
pub struct InflightGuard {
    inner: Arc<DrainInner>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inner.inflight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// How one server task ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerExit {
    /// Stopped on its own within the timeout.
    Graceful,
    /// Returned an error or panicked.
    Failed(String),
    /// Still running at the deadline and aborted.
    Forced,
}

#[derive(Clone, Debug)]
pub struct ShutdownReport {
    pub servers: Vec<(&'static str, ServerExit)>,
    /// In-flight work left when the grace period ended.
    pub inflight_after_grace: usize,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Every server stopped gracefully.
    pub fn is_clean(&self) -> bool {
        self.servers
            .iter()
            .all(|(_, exit)| *exit == ServerExit::Graceful)
    }
}

/// Runs the drain sequence for a set of server tasks.
#[derive(Debug)]
pub struct DrainSupervisor {
    drain: Drain,
    stop: CancellationToken,
    grace: Duration,
    timeout: Duration,
}

impl DrainSupervisor {
    pub fn new(drain: Drain, grace: Duration, timeout: Duration) -> Self {
        Self {
            drain,
            stop: CancellationToken::new(),
            grace,
            timeout,
        }
    }

    /// Token a server waits on to stop accepting connections.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.child_token()
    }

    /// Drains and stops `servers`, consuming the supervisor.
    pub async fn shutdown<E>(
        self,
        servers: Vec<(&'static str, JoinHandle<Result<(), E>>)>,
    ) -> ShutdownReport
    where
        E: fmt::Display + Send + 'static,
    {
        let start = Instant::now();

        if self.drain.begin_drain() {
            tracing::info!("Draining: rejecting new requests");
        }

        tracing::info!(
            inflight = self.drain.inflight(),
            grace_ms = self.grace.as_millis() as u64,
            "Waiting for grace period"
        );
        tokio::time::sleep(self.grace).await;
        let inflight_after_grace = self.drain.inflight();

        tracing::info!(
            inflight = inflight_after_grace,
            timeout_secs = self.timeout.as_secs(),
            "Stopping servers"
        );
        self.stop.cancel();

        let timeout = self.timeout;
        let servers = join_all(
            servers
                .into_iter()
                .map(|(name, handle)| join_server(name, handle, timeout)),
        )
        .await;

        let report = ShutdownReport {
            servers,
            inflight_after_grace,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            clean = report.is_clean(),
            "Shutdown complete"
        );
        report
    }
}

async fn join_server<E>(
    name: &'static str,
    mut handle: JoinHandle<Result<(), E>>,
    timeout: Duration,
) -> (&'static str, ServerExit)
where
    E: fmt::Display + Send + 'static,
{
    let exit = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!(server = name, "Server stopped");
            ServerExit::Graceful
        }
        Ok(Ok(Err(e))) => {
            tracing::error!(server = name, error = %e, "Server shutdown error");
            ServerExit::Failed(e.to_string())
        }
        Ok(Err(e)) => {
            tracing::error!(server = name, error = %e, "Server task failed");
            ServerExit::Failed(e.to_string())
        }
        Err(_) => {
            tracing::warn!(server = name, "Shutdown timed out, forcing close");
            handle.abort();
            ServerExit::Forced
        }
    };
    (name, exit)
}
