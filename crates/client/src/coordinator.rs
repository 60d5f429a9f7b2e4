//! Per-operation retry state machine for the UI
//!
//! The coordinator reads the server's error body and decides whether the
//! user sees a countdown followed by an automatic retry, or a terminal
//! failure with suggestions and a manual retry button.
//!
//! Every transition takes the relevant instant explicitly, so the machine
//! is deterministic under test. [`ClientRetryCoordinator::drive`] runs the
//! whole loop against the real (or paused) tokio clock.

use std::future::Future;
use std::time::Duration;

use taleweaver_common::error::ErrorKind;
use taleweaver_domain::{ApiErrorBody, ErrorEnvelope};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ticker::CountdownTicker;

/// Automatic retries before the user has to retry by hand
pub const DEFAULT_RETRY_CAP: u32 = 3;

const LOCAL_BACKOFF_BASE: Duration = Duration::from_secs(1);
const LOCAL_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// What the user sees when no more automatic retries will happen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: String,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Loading,
    Success,
    /// Counting down to automatic retry number `attempt`
    WaitingRetry { attempt: u32, deadline: Instant },
    Failed(Failure),
}

impl RetryState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Success => "success",
            Self::WaitingRetry { .. } => "waiting_retry",
            Self::Failed(_) => "failed",
        }
    }
}

/// What the caller should do after [`ClientRetryCoordinator::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// The wait is over; the state is now `Loading`
    RetryNow,
    /// Whole seconds left, rounded up, for the countdown
    Countdown(u64),
    /// Nothing scheduled
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: &'static str },
}

/// Drives one user-facing operation through its retries
#[derive(Debug)]
pub struct ClientRetryCoordinator {
    state: RetryState,
    attempts: u32,
    cap: u32,
    publisher: watch::Sender<RetryState>,
}

impl Default for ClientRetryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRetryCoordinator {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_RETRY_CAP)
    }

    pub fn with_cap(cap: u32) -> Self {
        let (publisher, _) = watch::channel(RetryState::Idle);
        Self { state: RetryState::Idle, attempts: 0, cap, publisher }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Automatic retries scheduled since the last success or manual retry
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Follow state changes, e.g. to render the countdown
    pub fn subscribe(&self) -> watch::Receiver<RetryState> {
        self.publisher.subscribe()
    }

    fn set_state(&mut self, state: RetryState) {
        debug!(from = self.state.name(), to = state.name(), attempts = self.attempts, "Retry state changed");
        self.state = state.clone();
        self.publisher.send_replace(state);
    }

    fn invalid(&self, action: &'static str) -> CoordinatorError {
        CoordinatorError::InvalidTransition { action, state: self.state.name() }
    }

    /// Start the operation: `Idle` or `Success` to `Loading`
    pub fn begin(&mut self) -> Result<(), CoordinatorError> {
        match self.state {
            RetryState::Idle | RetryState::Success => {
                self.set_state(RetryState::Loading);
                Ok(())
            }
            _ => Err(self.invalid("begin")),
        }
    }

    /// The in-flight request succeeded; the attempt counter resets
    pub fn on_success(&mut self) -> Result<(), CoordinatorError> {
        if self.state != RetryState::Loading {
            return Err(self.invalid("complete"));
        }
        self.attempts = 0;
        self.set_state(RetryState::Success);
        Ok(())
    }

    /// The in-flight request failed with `body`, received at `received_at`.
    ///
    /// Retryable errors below the cap schedule a retry at
    /// `received_at + retry_after`, or after the local backoff when the
    /// server gave no hint. Everything else fails terminally. A body whose
    /// code is malformed is treated as not retryable.
    pub fn on_error(
        &mut self,
        body: &ApiErrorBody,
        received_at: Instant,
    ) -> Result<&RetryState, CoordinatorError> {
        if self.state != RetryState::Loading {
            return Err(self.invalid("record an error"));
        }
        self.record(body, received_at);
        Ok(&self.state)
    }

    fn record(&mut self, body: &ApiErrorBody, received_at: Instant) {
        let code_is_valid = body.parsed_code().is_ok();
        if !code_is_valid {
            warn!(code = %body.code, "Malformed error code; not retrying");
        }

        if body.retryable && code_is_valid && self.attempts < self.cap {
            self.attempts += 1;
            let wait = match body.retry_after {
                Some(secs) => Duration::from_secs(secs),
                None => local_backoff(self.attempts),
            };
            info!(
                code = %body.code,
                attempt = self.attempts,
                cap = self.cap,
                wait_secs = wait.as_secs(),
                "Scheduling automatic retry"
            );
            self.set_state(RetryState::WaitingRetry {
                attempt: self.attempts,
                deadline: received_at + wait,
            });
        } else {
            if body.retryable && code_is_valid {
                warn!(code = %body.code, cap = self.cap, "Automatic retries exhausted");
            }
            self.set_state(RetryState::Failed(Failure {
                code: body.code.clone(),
                message: body.message.clone(),
                suggestions: body.suggestions.clone(),
            }));
        }
    }

    /// `max(0, retry_after - time since the response was received)`, while
    /// waiting to retry
    pub fn remaining_wait(&self, now: Instant) -> Option<Duration> {
        match self.state {
            RetryState::WaitingRetry { deadline, .. } => Some(deadline.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Advance the countdown; moves to `Loading` once the wait is over
    pub fn poll(&mut self, now: Instant) -> CoordinatorAction {
        match self.remaining_wait(now) {
            None => CoordinatorAction::Idle,
            Some(remaining) if remaining.is_zero() => {
                self.set_state(RetryState::Loading);
                CoordinatorAction::RetryNow
            }
            Some(remaining) => CoordinatorAction::Countdown(ceil_secs(remaining)),
        }
    }

    /// The user asked to try again after a terminal failure
    pub fn retry_manually(&mut self) -> Result<(), CoordinatorError> {
        if !matches!(self.state, RetryState::Failed(_)) {
            return Err(self.invalid("retry manually"));
        }
        self.attempts = 0;
        self.set_state(RetryState::Loading);
        Ok(())
    }

    /// Run `operation` to completion: retry while the server says so, wait
    /// out each countdown on `ticker`, and stop at success or a terminal
    /// failure.
    ///
    /// Starting from `Failed` counts as a manual retry.
    pub async fn drive<T, F, Fut>(&mut self, ticker: &CountdownTicker, mut operation: F) -> Result<T, Failure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiErrorBody>>,
    {
        match self.state {
            RetryState::Failed(_) => {
                self.attempts = 0;
                self.set_state(RetryState::Loading);
            }
            RetryState::Idle | RetryState::Success | RetryState::WaitingRetry { .. } => {
                self.set_state(RetryState::Loading);
            }
            RetryState::Loading => {}
        }

        let mut ticks = ticker.subscribe();
        loop {
            let body = match operation().await {
                Ok(value) => {
                    self.attempts = 0;
                    self.set_state(RetryState::Success);
                    return Ok(value);
                }
                Err(body) => body,
            };

            self.record(&body, Instant::now());
            if let RetryState::Failed(failure) = &self.state {
                return Err(failure.clone());
            }

            loop {
                match self.poll(Instant::now()) {
                    CoordinatorAction::RetryNow => break,
                    CoordinatorAction::Countdown(_) => {
                        if ticks.changed().await.is_err() {
                            // ticker gone; finish this wait on our own timer
                            if let RetryState::WaitingRetry { deadline, .. } = self.state {
                                tokio::time::sleep_until(deadline).await;
                            }
                        }
                    }
                    CoordinatorAction::Idle => break,
                }
            }
        }
    }
}

/// `1s * 2^(attempt-1)`, capped at 30s
fn local_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    LOCAL_BACKOFF_BASE.saturating_mul(1u32 << exponent).min(LOCAL_BACKOFF_MAX)
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

/// Read an error response body.
///
/// Anything that is not a well-formed envelope becomes a non-retryable
/// internal error, so the UI never retries blindly.
pub fn error_from_response(body: &str) -> ApiErrorBody {
    match ErrorEnvelope::from_json(body) {
        Ok(envelope) => envelope.error,
        Err(e) => {
            warn!(error = %e, "Unreadable error response");
            ApiErrorBody {
                code: ErrorKind::Internal.code().to_string(),
                message: "The server returned an unreadable error.".to_string(),
                details: None,
                retryable: false,
                retry_after: None,
                suggestions: ErrorKind::Internal.default_suggestions(),
                error_id: None,
            }
        }
    }
}
