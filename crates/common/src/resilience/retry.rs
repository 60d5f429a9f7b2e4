//! Bounded, classified retry around dependency calls
//!
//! [`RetryExecutor`] wraps a fallible operation. For every attempt it:
//!
//! 1. checks the cancellation token,
//! 2. asks the dependency's breaker for a permit (an open breaker ends the
//!    run at once with `DEP-CIR-001` and consumes no attempt),
//! 3. invokes the operation and classifies any failure into an [`ErrorKind`].
//!
//! Non-retryable failures propagate after the first attempt. Retryable ones
//! sleep before the next attempt: a rate limit sleeps exactly the advertised
//! `retry_after` (capped) and is not a breaker failure, everything else uses
//! exponential backoff with jitter and is reported to the breaker when it is a
//! dependency health signal. Each attempt's context is chained onto the
//! previous one, so the error that finally surfaces carries the whole history.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{BreakerRegistry, CircuitState, Clock, ConfigError, Sleeper, SystemClock, TokioSleeper};
use crate::error::{ErrorClassification, ErrorContext, ErrorKind, StructuredError, TaxonomyError};

/// Share of the backoff delay that jitter may add
const JITTER_RATIO: f64 = 0.1;

type RetryPredicate = Arc<dyn Fn(&ErrorKind) -> bool + Send + Sync>;

/// Attempt limits and delays for one class of calls
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    is_retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
            is_retryable: Arc::new(ErrorKind::is_retryable),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    pub fn is_retryable(&self, kind: &ErrorKind) -> bool {
        (self.is_retryable)(kind)
    }

    /// `min(max_delay, base_delay * 2^(attempt-1))`, without jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the attempt following a failed `attempt` of `kind`
    pub fn delay_for(&self, kind: &ErrorKind, attempt: u32) -> Duration {
        if let ErrorKind::RateLimited { retry_after } = kind {
            return (*retry_after).min(self.max_delay);
        }
        let delay = self.backoff_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max_jitter_ms = (delay.as_millis() as f64 * JITTER_RATIO) as u64;
        let jitter = if max_jitter_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=max_jitter_ms) };
        (delay + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`]
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter = enabled;
        self
    }

    /// Replace the retryability predicate
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ErrorKind) -> bool + Send + Sync + 'static,
    {
        self.policy.is_retryable = Arc::new(predicate);
        self
    }

    pub fn build(self) -> Result<RetryPolicy, ConfigError> {
        if self.policy.max_attempts == 0 {
            return Err(ConfigError::Invalid { message: "max_attempts must be greater than 0".to_string() });
        }
        if self.policy.base_delay > self.policy.max_delay {
            return Err(ConfigError::Invalid {
                message: "base_delay must not exceed max_delay".to_string(),
            });
        }
        Ok(self.policy)
    }
}

/// Maps a dependency's native errors onto the error taxonomy
pub trait ErrorClassifier<E>: Send + Sync {
    fn classify(&self, error: &E) -> ErrorKind;
}

impl<E, F> ErrorClassifier<E> for F
where
    F: Fn(&E) -> ErrorKind + Send + Sync,
{
    fn classify(&self, error: &E) -> ErrorKind {
        self(error)
    }
}

/// What every wrapped external call supplies: the breaker it belongs to, an
/// operation name for diagnostics, and its error classifier
#[derive(Debug, Clone)]
pub struct DependencyCall<K> {
    dependency: String,
    operation: String,
    classifier: K,
}

impl<K> DependencyCall<K> {
    pub fn new(
        dependency: impl Into<String>,
        operation: impl Into<String>,
        classifier: K,
    ) -> Result<Self, TaxonomyError> {
        let dependency = dependency.into();
        let operation = operation.into();
        if dependency.trim().is_empty() {
            return Err(TaxonomyError::EmptyField { field: "dependency" });
        }
        if operation.trim().is_empty() {
            return Err(TaxonomyError::EmptyField { field: "operation" });
        }
        Ok(Self { dependency, operation, classifier })
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    fn context(&self, attempt: u32) -> ErrorContext {
        ErrorContext::from_parts(self.dependency.clone(), self.operation.clone())
            .with_data("attempt", attempt)
            .with_data("dependency", self.dependency.as_str())
    }
}

/// Result of a run plus what it took to get there
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, StructuredError>,
    /// Times the operation was actually invoked
    pub attempts: u32,
    pub total_delay: Duration,
    /// Every completed backoff sleep, in order
    pub delays: Vec<Duration>,
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T, StructuredError> {
        self.result
    }
}

/// Runs operations under a retry policy and their dependency's breaker
pub struct RetryExecutor<C: Clock = SystemClock, S: Sleeper = TokioSleeper> {
    breakers: Arc<BreakerRegistry<C>>,
    sleeper: S,
}

impl<C: Clock, S: Sleeper + Clone> Clone for RetryExecutor<C, S> {
    fn clone(&self) -> Self {
        Self { breakers: Arc::clone(&self.breakers), sleeper: self.sleeper.clone() }
    }
}

impl<C: Clock, S: Sleeper> fmt::Debug for RetryExecutor<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor").field("breakers", &self.breakers).finish_non_exhaustive()
    }
}

impl<C: Clock> RetryExecutor<C, TokioSleeper> {
    pub fn new(breakers: Arc<BreakerRegistry<C>>) -> Self {
        Self::with_sleeper(breakers, TokioSleeper)
    }
}

impl<C: Clock, S: Sleeper> RetryExecutor<C, S> {
    /// Create an executor with a custom sleeper (useful for testing)
    pub fn with_sleeper(breakers: Arc<BreakerRegistry<C>>, sleeper: S) -> Self {
        Self { breakers, sleeper }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry<C>> {
        &self.breakers
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// attempts, is rejected by the breaker, or is cancelled
    pub async fn execute<T, E, K, F, Fut>(
        &self,
        call: &DependencyCall<K>,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, StructuredError>
    where
        K: ErrorClassifier<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_outcome(call, policy, cancel, operation).await.into_result()
    }

    #[instrument(
        skip(self, call, policy, cancel, operation),
        fields(dependency = %call.dependency, operation = %call.operation, max_attempts = policy.max_attempts)
    )]
    pub async fn execute_with_outcome<T, E, K, F, Fut>(
        &self,
        call: &DependencyCall<K>,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        K: ErrorClassifier<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempts = 0u32;
        let mut delays = Vec::new();
        let mut total_delay = Duration::ZERO;
        let mut last_error: Option<StructuredError> = None;

        macro_rules! finish {
            ($result:expr) => {
                return RetryOutcome { result: $result, attempts, total_delay, delays }
            };
        }

        let breaker = match self.breakers.get(&call.dependency) {
            Ok(breaker) => breaker,
            Err(err) => finish!(Err(StructuredError::new(
                ErrorKind::Internal,
                err.to_string(),
                call.context(0)
            ))),
        };

        loop {
            if cancel.is_cancelled() {
                finish!(Err(cancelled(call, attempts, last_error.as_ref())));
            }

            let permit = match breaker.try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    let mut err = open.into_error();
                    if let Some(previous) = last_error.take() {
                        err = previous.wrap(
                            err.kind().clone(),
                            err.message().to_string(),
                            call.context(attempts),
                        );
                    }
                    warn!(attempts, "Circuit open, failing fast");
                    finish!(Err(err));
                }
            };

            attempts += 1;
            debug!(attempt = attempts, "Executing operation");

            let result = tokio::select! {
                () = cancel.cancelled() => {
                    drop(permit);
                    finish!(Err(cancelled(call, attempts, last_error.as_ref())));
                }
                result = operation() => result,
            };

            let native = match result {
                Ok(value) => {
                    permit.succeed();
                    if attempts > 1 {
                        debug!(attempts, "Operation succeeded after retries");
                    }
                    finish!(Ok(value));
                }
                Err(native) => native,
            };

            let kind = call.classifier.classify(&native);
            let mut context = call.context(attempts);
            if let Some(previous) = last_error.take() {
                context = context.caused_by(previous.context().clone());
            }
            let err = StructuredError::new(kind, native.to_string(), context);

            if err.kind().counts_against_breaker() {
                permit.fail();
            } else {
                drop(permit);
            }

            if !policy.is_retryable(err.kind()) {
                debug!(error_code = err.code(), attempts, "Non-retryable failure, propagating");
                finish!(Err(err));
            }
            if attempts >= policy.max_attempts {
                warn!(error_code = err.code(), attempts, "All retry attempts exhausted");
                finish!(Err(err));
            }

            if breaker.state() == CircuitState::Open {
                // this failure tripped the breaker; the next acquire fails fast
                debug!(error_code = err.code(), attempts, "Circuit opened, skipping backoff");
                last_error = Some(err);
                continue;
            }

            let delay = policy.delay_for(err.kind(), attempts);
            if cancel.is_cancelled() {
                finish!(Err(cancelled(call, attempts, Some(&err))));
            }
            warn!(
                error_code = err.code(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Retryable failure, backing off"
            );
            last_error = Some(err);

            tokio::select! {
                () = cancel.cancelled() => {
                    finish!(Err(cancelled(call, attempts, last_error.as_ref())));
                }
                () = self.sleeper.sleep(delay) => {}
            }
            delays.push(delay);
            total_delay += delay;
        }
    }
}

fn cancelled<K>(call: &DependencyCall<K>, attempts: u32, last: Option<&StructuredError>) -> StructuredError {
    debug!(attempts, "Retry run cancelled");
    let mut context = call.context(attempts);
    if let Some(previous) = last {
        context = context.caused_by(previous.context().clone());
    }
    StructuredError::new(ErrorKind::Cancelled, format!("'{}' was cancelled", call.operation), context)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::super::{CircuitBreakerConfig, CircuitState, MockClock};
    use super::*;
    use crate::testing::{PendingSleeper, RecordingSleeper};

    #[derive(Debug, Clone, PartialEq)]
    enum FakeError {
        Transient,
        Invalid,
        Throttled(u64),
        Unauthorized,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn classify(error: &FakeError) -> ErrorKind {
        match error {
            FakeError::Transient => ErrorKind::BadGateway,
            FakeError::Invalid => ErrorKind::Validation,
            FakeError::Throttled(secs) => ErrorKind::RateLimited { retry_after: Duration::from_secs(*secs) },
            FakeError::Unauthorized => ErrorKind::Unauthenticated,
        }
    }

    fn call() -> DependencyCall<fn(&FakeError) -> ErrorKind> {
        DependencyCall::new("image-gen", "generate_image", classify as fn(&FakeError) -> ErrorKind).unwrap()
    }

    fn executor(threshold: u32) -> (RetryExecutor<MockClock, RecordingSleeper>, RecordingSleeper, MockClock) {
        let clock = MockClock::new();
        let mut configs = HashMap::new();
        configs.insert("image-gen".to_string(), CircuitBreakerConfig::new(threshold, Duration::from_secs(30)));
        let registry =
            BreakerRegistry::with_clock(CircuitBreakerConfig::default(), configs, clock.clone()).unwrap();
        let sleeper = RecordingSleeper::with_clock(clock.clone());
        (RetryExecutor::with_sleeper(Arc::new(registry), sleeper.clone()), sleeper, clock)
    }

    fn policy(max_attempts: u32, base_ms: u64, jitter: bool) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .base_delay(Duration::from_millis(base_ms))
            .max_delay(Duration::from_secs(10))
            .jitter(jitter)
            .build()
            .unwrap()
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::builder().max_attempts(0).build().is_err());
        assert!(RetryPolicy::builder()
            .base_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(1))
            .build()
            .is_err());
        let default = RetryPolicy::default();
        assert_eq!(default.max_attempts(), 3);
        assert!(default.jitter());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .build()
            .unwrap();
        let delays: Vec<u128> = (1..=5).map(|a| policy.backoff_delay(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(policy.backoff_delay(200), Duration::from_millis(500));
    }

    #[test]
    fn test_jittered_delay_stays_in_bounds() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_millis(1000))
            .max_delay(Duration::from_millis(3000))
            .build()
            .unwrap();
        for attempt in 1..=6 {
            for _ in 0..50 {
                let delay = policy.delay_for(&ErrorKind::GatewayTimeout, attempt);
                let base = policy.backoff_delay(attempt);
                assert!(delay >= base);
                assert!(delay <= base + base / 10);
                assert!(delay <= policy.max_delay());
            }
        }
    }

    #[test]
    fn test_rate_limit_delay_uses_retry_after() {
        let policy = policy(3, 100, true);
        let kind = ErrorKind::RateLimited { retry_after: Duration::from_secs(4) };
        assert_eq!(policy.delay_for(&kind, 1), Duration::from_secs(4));
        let long = ErrorKind::RateLimited { retry_after: Duration::from_secs(60) };
        assert_eq!(policy.delay_for(&long, 1), Duration::from_secs(10));
    }

    #[test]
    fn test_dependency_call_rejects_empty_names() {
        assert!(DependencyCall::new("", "op", classify as fn(&FakeError) -> ErrorKind).is_err());
        assert!(DependencyCall::new("dep", " ", classify as fn(&FakeError) -> ErrorKind).is_err());
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let (executor, sleeper, _clock) = executor(5);
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute_with_outcome(&call(), &policy(3, 100, false), &CancellationToken::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FakeError::Transient)
                } else {
                    Ok("picture")
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "picture");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.delays, vec![Duration::from_millis(100), Duration::from_millis(200)]);
        assert_eq!(sleeper.recorded(), outcome.delays);
        assert_eq!(outcome.total_delay, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_non_retryable_is_single_attempt() {
        let (executor, sleeper, _clock) = executor(5);
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute_with_outcome(&call(), &policy(3, 100, true), &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FakeError::Invalid)
            })
            .await;

        let err = outcome.result.unwrap_err();
        assert_eq!(err.code(), "VAL-INP-001");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_kind_and_chains_every_attempt() {
        let (executor, _sleeper, _clock) = executor(10);
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute_with_outcome(&call(), &policy(4, 50, true), &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FakeError::Transient)
            })
            .await;

        assert_eq!(outcome.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.delays.len(), 3);
        assert!(outcome.delays.iter().all(|d| *d <= Duration::from_secs(10)));

        let err = outcome.result.unwrap_err();
        assert_eq!(err.code(), "NET-GTW-001");
        assert_eq!(err.context().depth(), 4);
        let attempts: Vec<_> = err.context().chain().filter_map(|c| c.data("attempt").cloned()).collect();
        assert_eq!(attempts, vec![json!(4), json!(3), json!(2), json!(1)]);
    }

    #[tokio::test]
    async fn test_rate_limit_does_not_trip_breaker() {
        let (executor, sleeper, _clock) = executor(1);
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute_with_outcome(&call(), &policy(3, 100, true), &CancellationToken::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FakeError::Throttled(2))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(sleeper.recorded(), vec![Duration::from_secs(2)]);
        let breaker = executor.breakers().get("image-gen").unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_count, 0);
    }

    #[tokio::test]
    async fn test_breaker_opening_mid_run_fails_fast() {
        let (executor, _sleeper, _clock) = executor(2);
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute_with_outcome(&call(), &policy(5, 10, false), &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FakeError::Transient)
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.attempts, 2);
        let err = outcome.result.unwrap_err();
        assert_eq!(err.code(), "DEP-CIR-001");
        assert_eq!(err.context().depth(), 3);
    }

    #[tokio::test]
    async fn test_no_backoff_after_failure_that_opens_breaker() {
        let (executor, sleeper, _clock) = executor(2);

        let outcome = executor
            .execute_with_outcome(&call(), &policy(5, 1_000, false), &CancellationToken::new(), || async {
                Err::<(), _>(FakeError::Transient)
            })
            .await;

        // one backoff after the first failure, none after the second
        assert_eq!(outcome.delays, vec![Duration::from_secs(1)]);
        assert_eq!(sleeper.recorded(), outcome.delays);
        assert_eq!(outcome.total_delay, Duration::from_secs(1));
        assert_eq!(outcome.result.unwrap_err().code(), "DEP-CIR-001");
    }

    #[tokio::test]
    async fn test_open_breaker_skips_operation_entirely() {
        let (executor, _sleeper, _clock) = executor(1);
        executor.breakers().get("image-gen").unwrap().try_acquire().unwrap().fail();
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute_with_outcome(&call(), &policy(3, 10, false), &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, FakeError>(())
            })
            .await;

        assert_eq!(outcome.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.result.unwrap_err().code(), "DEP-CIR-001");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let (executor, _sleeper, _clock) = executor(1);
        let token = CancellationToken::new();
        token.cancel();

        let outcome = executor
            .execute_with_outcome(&call(), &policy(3, 10, false), &token, || async { Ok::<_, FakeError>(()) })
            .await;

        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.result.unwrap_err().code(), "REQ-CAN-001");
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_charges_breaker_once() {
        let clock = MockClock::new();
        let mut configs = HashMap::new();
        configs.insert("image-gen".to_string(), CircuitBreakerConfig::new(5, Duration::from_secs(30)));
        let registry = Arc::new(
            BreakerRegistry::with_clock(CircuitBreakerConfig::default(), configs, clock).unwrap(),
        );
        let executor = RetryExecutor::with_sleeper(Arc::clone(&registry), PendingSleeper);
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let run = {
            let token = token.clone();
            let calls = Arc::clone(&calls);
            async move {
                executor
                    .execute_with_outcome(&call(), &policy(3, 100, false), &token, || {
                        let calls = Arc::clone(&calls);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Err::<(), _>(FakeError::Transient)
                        }
                    })
                    .await
            }
        };
        let handle = tokio::spawn(run);
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        token.cancel();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.delays.is_empty());
        let err = outcome.result.unwrap_err();
        assert_eq!(err.code(), "REQ-CAN-001");
        assert_eq!(err.context().root_cause().data("attempt"), Some(&json!(1)));
        assert_eq!(registry.get("image-gen").unwrap().metrics().failure_count, 1);
    }

    #[tokio::test]
    async fn test_custom_predicate_overrides_retryability() {
        let (executor, _sleeper, _clock) = executor(5);
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .jitter(false)
            .retry_if(|kind| matches!(kind, ErrorKind::Unauthenticated))
            .build()
            .unwrap();

        let outcome = executor
            .execute_with_outcome(&call(), &policy, &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FakeError::Unauthorized)
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap_err().code(), "AUTH-TOK-001");
    }
}
