//! Time source for the verification engine.
//!
//! Every delay the engine measures goes through a [`Clock`]: cache expiry,
//! retry timers and store call timeouts. Tests drive them by hand with
//! [`ManualClock`]. The wall clock is only consulted to compare stored ban
//! timestamps against the current date.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Monotonic time plus one-shot delayed notifications.
pub trait Clock: Send + Sync {
    /// Current monotonic time.
    fn now(&self) -> Instant;

    /// A future that completes once `duration` has elapsed on this clock.
    ///
    /// The delay starts when `sleep` is called, not when the future is first
    /// polled.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// [`Clock`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep_until(Instant::now() + duration))
    }
}

/// Hand-driven [`Clock`] for tests and simulations.
///
/// Time only moves when [`ManualClock::advance`] is called; pending sleeps
/// whose deadline has been reached complete at that point.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

struct ManualState {
    now: Instant,
    sleepers: Vec<(Instant, oneshot::Sender<()>)>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                now: Instant::now(),
                sleepers: Vec::new(),
            })),
        }
    }

    /// Move time forward and wake every sleeper that is now due.
    pub fn advance(&self, duration: Duration) {
        let due = {
            let mut state = self.inner.lock();
            state.now += duration;
            let now = state.now;
            let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.sleepers)
                .into_iter()
                .partition(|(deadline, _)| *deadline <= now);
            state.sleepers = pending;
            due
        };
        for (_, waker) in due {
            let _ = waker.send(());
        }
    }

    /// Number of sleeps that have not completed yet.
    #[must_use]
    pub fn pending_sleeps(&self) -> usize {
        self.inner.lock().sleepers.len()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualClock")
            .field("pending_sleeps", &self.pending_sleeps())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.lock().now
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.lock();
            if duration.is_zero() {
                let _ = tx.send(());
            } else {
                let deadline = state.now + duration;
                state.sleepers.push((deadline, tx));
            }
        }
        Box::pin(async move {
            if rx.await.is_err() {
                // Clock dropped: time will never reach the deadline.
                std::future::pending::<()>().await;
            }
        })
    }
}
