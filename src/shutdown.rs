//! The shutdown flag and the signal bridge that drives it.
//!
//! `Shutdown` is the process-wide, asynchronously-settable boolean the rest
//! of the crate is built around: the supervisor races its accept against it,
//! the timestamp producer races its timer against it, and every connection
//! worker races its read against it. `bridge` is the only thing allowed to
//! set it.

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// A clonable handle to the shutdown flag.
///
/// Cloning is shallow: every clone shares the same flag and the same
/// `Notify`, so triggering shutdown through any one of them wakes every
/// waiter on every other.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if shutdown has been requested. Never blocks.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sets the flag and wakes every task currently waiting in `notified`.
    ///
    /// Monotonic: transitions false -> true exactly once in practice (the
    /// signal bridge only calls this once per process), but calling it again
    /// would simply be a no-op store plus a redundant wakeup.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolves immediately if shutdown has already been requested;
    /// otherwise waits until `trigger` is called.
    ///
    /// Intended to be raced via `tokio::select!` against a blocking
    /// operation (accept, a socket read, a timer tick) so that operation is
    /// abandoned promptly once shutdown begins — the async equivalent of
    /// forcing a blocked syscall to return via socket shutdown.
    pub async fn notified(&self) {
        // The `Notified` future must be constructed before the `is_set`
        // check: `notify_waiters` only wakes futures that already exist at
        // the moment it's called, and stores no permit for later ones. If
        // the check ran first, a `trigger` landing between the check and
        // the `notified()` call would be missed entirely and this would
        // park forever.
        let notified = self.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

/// Installs the SIGTERM listener.
///
/// This is split out from [`watch`] because installing a signal handler can
/// fail, and that failure is startup-fatal: it must be reported before the
/// supervisor ever starts accepting connections, not logged from inside a
/// spawned task after the fact.
pub fn install_terminate_signal() -> Result<tokio::signal::unix::Signal> {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(Error::SignalSetup)
}

/// Waits for SIGINT or the pre-installed SIGTERM listener, then triggers
/// `shutdown`.
///
/// This is the signal bridge. It performs exactly this and nothing else: no
/// cleanup, no file or socket teardown, runs here. Everything downstream
/// reacts to the flag on its own task.
pub async fn watch(shutdown: Shutdown, mut terminate: tokio::signal::unix::Signal) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }

    info!("Caught signal, exiting");
    shutdown.trigger();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_unset() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_set());
    }

    #[tokio::test]
    async fn trigger_is_observed_without_waiting() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(shutdown.is_set());
        // Already set: `notified` must resolve immediately.
        tokio::time::timeout(Duration::from_millis(50), shutdown.notified())
            .await
            .expect("notified() should resolve immediately once the flag is set");
    }

    #[tokio::test]
    async fn trigger_wakes_an_already_waiting_task() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move {
            waiter.notified().await;
        });

        // Give the spawned task a chance to start waiting before triggering.
        tokio::task::yield_now().await;
        shutdown.trigger();

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("waiter should wake up after trigger")
            .unwrap();
    }
}
