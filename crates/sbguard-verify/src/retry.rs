//! Fixed-interval retry timers, one per concern.
//!
//! The scheduler keeps an `Option<RetryTimer>` per [`Concern`]. Arming an
//! already-armed concern is a no-op, so any number of failures before the
//! timer fires collapse into one retry. Timers run as spawned tasks that
//! sleep on the engine [`Clock`] and then post a [`TimerFired`] notification
//! back to the owner's sequencer; the owner hands it to [`RetryScheduler::fire`],
//! which disarms the concern *before* returning the callback so the callback
//! can re-arm if the retry fails again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sbguard_config::clamp_retry_delay;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::Clock;

/// A class of retryable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    /// Reload the admin roster.
    RosterLoad,
    /// Recheck every identity in the pending queue.
    BanRecheck,
}

impl Concern {
    pub const ALL: [Concern; 2] = [Concern::RosterLoad, Concern::BanRecheck];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RosterLoad => "roster_load",
            Self::BanRecheck => "ban_recheck",
        }
    }
}

impl fmt::Display for Concern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one armed timer so late notifications can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Posted by a timer task when its delay has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub concern: Concern,
    pub id: TimerId,
}

/// Callback run when a retry fires, given the scheduler's owner.
pub type RetryCallback<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Sink for fire notifications, usually a channel back to the sequencer.
pub type FireNotifier = Arc<dyn Fn(TimerFired) + Send + Sync>;

/// A live retry timer.
pub struct RetryTimer<C> {
    pub id: TimerId,
    pub concern: Concern,
    pub fire_at: Instant,
    callback: RetryCallback<C>,
    task: JoinHandle<()>,
}

impl<C> fmt::Debug for RetryTimer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTimer")
            .field("id", &self.id)
            .field("concern", &self.concern)
            .field("fire_at", &self.fire_at)
            .finish()
    }
}

/// Statistics about the retry scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Timers armed.
    pub armed: u64,
    /// `arm_if_idle` calls that found the concern already armed.
    pub coalesced: u64,
    /// Timers that fired and handed back their callback.
    pub fired: u64,
    /// Timers cancelled before firing.
    pub cancelled: u64,
}

/// Arms at most one retry per concern.
pub struct RetryScheduler<C> {
    clock: Arc<dyn Clock>,
    notify: FireNotifier,
    roster_load: Option<RetryTimer<C>>,
    ban_recheck: Option<RetryTimer<C>>,
    next_id: u64,
    stats: RetryStats,
}

impl<C> RetryScheduler<C> {
    /// Create a scheduler.
    ///
    /// # Arguments
    ///
    /// * `clock` - Time source the timers sleep on
    /// * `notify` - Receives a [`TimerFired`] when a timer's delay elapses
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, notify: FireNotifier) -> Self {
        Self {
            clock,
            notify,
            roster_load: None,
            ban_recheck: None,
            next_id: 0,
            stats: RetryStats::default(),
        }
    }

    fn slot(&self, concern: Concern) -> &Option<RetryTimer<C>> {
        match concern {
            Concern::RosterLoad => &self.roster_load,
            Concern::BanRecheck => &self.ban_recheck,
        }
    }

    fn slot_mut(&mut self, concern: Concern) -> &mut Option<RetryTimer<C>> {
        match concern {
            Concern::RosterLoad => &mut self.roster_load,
            Concern::BanRecheck => &mut self.ban_recheck,
        }
    }

    /// Arm a one-shot retry for `concern` unless one is already armed.
    ///
    /// `delay` is clamped to the allowed retry range. Returns `true` if a new
    /// timer was armed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm_if_idle(
        &mut self,
        concern: Concern,
        delay: Duration,
        callback: impl FnOnce(&mut C) + Send + 'static,
    ) -> bool {
        if self.slot(concern).is_some() {
            self.stats.coalesced += 1;
            tracing::debug!(concern = %concern, "Retry already armed");
            return false;
        }

        let delay = clamp_retry_delay(delay);
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let fire_at = self.clock.now() + delay;

        let sleep = self.clock.sleep(delay);
        let notify = Arc::clone(&self.notify);
        let task = tokio::spawn(async move {
            sleep.await;
            notify(TimerFired { concern, id });
        });

        *self.slot_mut(concern) = Some(RetryTimer {
            id,
            concern,
            fire_at,
            callback: Box::new(callback),
            task,
        });
        self.stats.armed += 1;

        tracing::info!(
            concern = %concern,
            delay_secs = delay.as_secs(),
            "Retry armed"
        );
        true
    }

    /// Disarm the timer that fired and hand back its callback.
    ///
    /// Returns `None` for notifications that no longer match the armed timer
    /// (it was cancelled or replaced after the notification was sent).
    pub fn fire(&mut self, fired: TimerFired) -> Option<RetryCallback<C>> {
        let slot = self.slot_mut(fired.concern);
        if slot.as_ref().map(|timer| timer.id) != Some(fired.id) {
            tracing::debug!(concern = %fired.concern, "Ignoring stale retry notification");
            return None;
        }

        let timer = slot.take()?;
        self.stats.fired += 1;
        tracing::debug!(concern = %fired.concern, "Retry fired");
        Some(timer.callback)
    }

    /// Cancel the armed timer for `concern`. Returns `true` if one was armed.
    pub fn cancel(&mut self, concern: Concern) -> bool {
        match self.slot_mut(concern).take() {
            Some(timer) => {
                timer.task.abort();
                self.stats.cancelled += 1;
                tracing::debug!(concern = %concern, "Retry cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every armed timer.
    pub fn cancel_all(&mut self) {
        for concern in Concern::ALL {
            self.cancel(concern);
        }
    }

    #[must_use]
    pub fn is_armed(&self, concern: Concern) -> bool {
        self.slot(concern).is_some()
    }

    #[must_use]
    pub fn armed(&self, concern: Concern) -> Option<&RetryTimer<C>> {
        self.slot(concern).as_ref()
    }

    /// Number of live timers across all concerns.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        Concern::ALL.iter().filter(|c| self.is_armed(**c)).count()
    }

    #[must_use]
    pub fn stats(&self) -> RetryStats {
        self.stats.clone()
    }
}

impl<C> Drop for RetryScheduler<C> {
    fn drop(&mut self) {
        for timer in [self.roster_load.take(), self.ban_recheck.take()]
            .into_iter()
            .flatten()
        {
            timer.task.abort();
        }
    }
}
