//! Shared timer for connect, response and idle timeouts.
//!
//! One scheduler serves every connection of a client. Each timer is a task
//! sleeping on the tokio clock; cancelling the handle or shutting the
//! scheduler down stops it before the callback runs. A callback that fires
//! concurrently with a cancel still runs, so callbacks must only act through
//! compare-and-swap state transitions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Scheduler {
    root: CancellationToken,
    pending: Arc<AtomicUsize>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `f` after `delay` unless cancelled first.
    ///
    /// Must be called from within a tokio runtime. After [`shutdown`] the
    /// returned handle is inert and `f` is dropped without running.
    ///
    /// [`shutdown`]: Scheduler::shutdown
    pub fn schedule<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.root.child_token();
        if self.root.is_cancelled() {
            return TimerHandle { token };
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(self.pending.clone());
        let cancelled = token.clone();
        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => f(),
            }
        });
        TimerHandle { token }
    }

    /// Cancel every outstanding timer and refuse new ones.
    pub fn shutdown(&self) {
        tracing::debug!(pending = self.pending(), "scheduler shutdown");
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Timers that have neither fired nor been cancelled yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cancels one scheduled timer. Cancelling twice, or after the timer fired,
/// does nothing.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
