//! One shared timer for every countdown on screen
//!
//! A single interval task publishes [`Tick`]s on a `watch` channel. Retry
//! loops and countdown widgets subscribe instead of running timers of their
//! own; a slow subscriber only ever sees the latest tick.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Tick period used by [`CountdownTicker::spawn_default`]
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(250);

/// A single beat of the shared timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Increments by one per beat, starting at 0
    pub seq: u64,
    pub at: Instant,
}

/// Owns the interval task; dropping the ticker stops it and closes every
/// subscription
#[derive(Debug)]
pub struct CountdownTicker {
    receiver: watch::Receiver<Tick>,
    period: Duration,
    task: JoinHandle<()>,
}

impl CountdownTicker {
    /// Start the timer. Must be called from within a tokio runtime.
    pub fn spawn(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let (sender, receiver) = watch::channel(Tick { seq: 0, at: Instant::now() });

        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            interval.tick().await;
            let mut seq = 0u64;
            loop {
                let at = interval.tick().await;
                seq += 1;
                sender.send_replace(Tick { seq, at });
            }
        });

        debug!(period_ms = period.as_millis() as u64, "Countdown ticker started");
        Self { receiver, period, task }
    }

    pub fn spawn_default() -> Self {
        Self::spawn(DEFAULT_TICK_PERIOD)
    }

    /// A new subscription; the current tick is marked as seen
    pub fn subscribe(&self) -> watch::Receiver<Tick> {
        let mut receiver = self.receiver.clone();
        receiver.mark_unchanged();
        receiver
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// The most recent tick
    pub fn latest(&self) -> Tick {
        *self.receiver.borrow()
    }
}

impl Drop for CountdownTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
