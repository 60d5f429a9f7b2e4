//! Sleepers and operations for driving the retry executor in tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::error::ErrorKind;
use crate::resilience::{MockClock, Sleeper};

/// Records every requested delay and returns immediately.
///
/// When built with a [`MockClock`], each sleep advances that clock by the
/// requested duration, so breaker timeouts and rate-limit windows observe
/// the time the executor "waited".
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
    clock: Option<MockClock>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: MockClock) -> Self {
        Self { delays: Arc::default(), clock: Some(clock) }
    }

    /// Delays requested so far, in order
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    pub fn total(&self) -> Duration {
        self.delays.lock().iter().sum()
    }

    pub fn clear(&self) {
        self.delays.lock().clear();
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.delays.lock().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
        future::ready(()).boxed()
    }
}

/// Never wakes up; useful to park a run in its backoff until it is cancelled
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingSleeper;

impl Sleeper for PendingSleeper {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        future::pending().boxed()
    }
}

/// Error produced by [`ScriptedOperation`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("scripted failure: {}", .kind.name())]
pub struct ScriptedFailure {
    pub kind: ErrorKind,
}

impl ScriptedFailure {
    /// Classifier for use with `DependencyCall`
    pub fn classify(error: &ScriptedFailure) -> ErrorKind {
        error.kind.clone()
    }
}

/// An operation that fails with a fixed sequence of kinds, then succeeds
#[derive(Debug, Clone)]
pub struct ScriptedOperation {
    failures: Arc<Vec<ErrorKind>>,
    forever: Option<ErrorKind>,
    calls: Arc<AtomicU32>,
}

impl ScriptedOperation {
    pub fn new(failures: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self { failures: Arc::new(failures.into_iter().collect()), forever: None, calls: Arc::default() }
    }

    /// Fails forever with `kind`
    pub fn always(kind: ErrorKind) -> Self {
        Self { failures: Arc::default(), forever: Some(kind), calls: Arc::default() }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Run the next step of the script
    pub fn invoke(&self) -> BoxFuture<'static, Result<u32, ScriptedFailure>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = match self.failures.get(call as usize).or(self.forever.as_ref()) {
            Some(kind) => Err(ScriptedFailure { kind: kind.clone() }),
            None => Ok(call + 1),
        };
        future::ready(outcome).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::Clock;

    #[tokio::test]
    async fn test_recording_sleeper_advances_clock() {
        let clock = MockClock::new();
        let sleeper = RecordingSleeper::with_clock(clock.clone());
        sleeper.sleep(Duration::from_millis(100)).await;
        sleeper.sleep(Duration::from_millis(200)).await;

        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
        assert_eq!(sleeper.total(), Duration::from_millis(300));
        assert_eq!(clock.millis_since_epoch(), 300);
    }

    #[tokio::test]
    async fn test_scripted_operation_follows_script() {
        let op = ScriptedOperation::new([ErrorKind::BadGateway, ErrorKind::GatewayTimeout]);
        assert_eq!(op.invoke().await.unwrap_err().kind, ErrorKind::BadGateway);
        assert_eq!(op.invoke().await.unwrap_err().kind, ErrorKind::GatewayTimeout);
        assert_eq!(op.invoke().await.unwrap(), 3);
        assert_eq!(op.calls(), 3);
    }
}
