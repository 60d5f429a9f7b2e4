//! Per-dependency circuit breaking
//!
//! Each external dependency (image generation, story generation) owns an
//! independent breaker, so one failing dependency never starves calls to
//! another. A breaker is a small state machine:
//!
//! - **Closed**: calls pass through; consecutive failures are counted and a
//!   success resets the count.
//! - **Open**: calls are rejected without touching the dependency until
//!   `reset_timeout` has elapsed since the breaker opened.
//! - **HalfOpen**: exactly one trial call is in flight. Its success closes the
//!   breaker, its failure re-opens it and restarts the timer.
//!
//! All state lives behind one lock per breaker, so every transition is a
//! single atomic step and the only legal edges are
//! Closed→Open→HalfOpen→{Closed | Open}.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::{Clock, ConfigError, SystemClock};
use crate::error::{ErrorContext, ErrorKind, Site, StructuredError};

const ACQUIRE_SITE: Site = Site::new("circuit_breaker", "try_acquire");
const HISTORY_LIMIT: usize = 32;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected
    Open,
    /// A single trial call probes for recovery
    HalfOpen,
}

impl CircuitState {
    /// Whether `self → next` is an edge of the state machine
    pub fn can_transition_to(self, next: CircuitState) -> bool {
        matches!(
            (self, next),
            (Self::Closed, Self::Open)
                | (Self::Open, Self::HalfOpen)
                | (Self::HalfOpen, Self::Closed)
                | (Self::HalfOpen, Self::Open)
        )
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for one breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(30) }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self { failure_threshold, reset_timeout }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "reset_timeout must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Returned when the breaker refuses a call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit for '{dependency}' is open")]
pub struct CircuitOpenInfo {
    pub dependency: String,
    /// Time until a trial call becomes possible; `None` while a half-open
    /// trial is already in flight
    pub retry_after: Option<Duration>,
}

impl CircuitOpenInfo {
    /// Convert into a `DEP-CIR-001` error
    pub fn into_error(self) -> StructuredError {
        let message = format!("Service '{}' is temporarily unavailable", self.dependency);
        let context = ErrorContext::at(ACQUIRE_SITE).with_data("dependency", self.dependency.as_str());
        StructuredError::new(
            ErrorKind::CircuitOpen { dependency: self.dependency, retry_after: self.retry_after },
            message,
            context,
        )
    }
}

/// Errors from [`CircuitBreaker::call`]
#[derive(Debug, Error)]
pub enum BreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The breaker rejected the call
    #[error(transparent)]
    Open(CircuitOpenInfo),

    /// The underlying operation failed
    #[error("Operation failed")]
    Failed {
        #[source]
        source: E,
    },
}

/// One recorded state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at_epoch_ms: u64,
}

/// Breaker metrics for monitoring and the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub dependency: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_seconds: u64,
    pub last_failure_epoch_ms: Option<u64>,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub transitions: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure_epoch_ms: Option<u64>,
    trial_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
    transitions: u64,
    history: VecDeque<Transition>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            last_failure_epoch_ms: None,
            trial_in_flight: false,
            total_calls: 0,
            rejected_calls: 0,
            transitions: 0,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    fn transition(&mut self, to: CircuitState, at_epoch_ms: u64) {
        debug_assert!(self.state.can_transition_to(to), "illegal breaker transition {} -> {to}", self.state);
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(Transition { from: self.state, to, at_epoch_ms });
        self.transitions += 1;
        self.state = to;
    }
}

struct Shared<C: Clock> {
    dependency: String,
    config: CircuitBreakerConfig,
    clock: Arc<C>,
    state: Mutex<BreakerState>,
}

/// Circuit breaker guarding one dependency
///
/// Clones share state.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use taleweaver_common::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, MockClock};
///
/// let clock = MockClock::new();
/// let config = CircuitBreakerConfig::new(1, Duration::from_secs(10));
/// let breaker = CircuitBreaker::with_clock("image-gen", config, clock.clone()).unwrap();
///
/// breaker.try_acquire().unwrap().fail();
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(breaker.try_acquire().is_err());
///
/// clock.advance(Duration::from_secs(10));
/// breaker.try_acquire().unwrap().succeed();
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// ```
pub struct CircuitBreaker<C: Clock = SystemClock> {
    shared: Arc<Shared<C>>,
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.shared.dependency)
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(dependency, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(
        dependency: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> Result<Self, ConfigError> {
        Self::with_shared_clock(dependency, config, Arc::new(clock))
    }

    pub(crate) fn with_shared_clock(
        dependency: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<C>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let dependency = dependency.into();
        if dependency.trim().is_empty() {
            return Err(ConfigError::Invalid { message: "dependency name must not be empty".to_string() });
        }
        Ok(Self {
            shared: Arc::new(Shared { dependency, config, clock, state: Mutex::new(BreakerState::new()) }),
        })
    }

    pub fn dependency(&self) -> &str {
        &self.shared.dependency
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.shared.config
    }

    /// Ask for permission to call the dependency.
    ///
    /// An open breaker whose timeout has elapsed moves to half-open here and
    /// hands out the single trial permit.
    pub fn try_acquire(&self) -> Result<CallPermit<C>, CircuitOpenInfo> {
        let shared = &self.shared;
        let mut guard = shared.state.lock();
        guard.total_calls += 1;

        match guard.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let elapsed = guard
                    .opened_at
                    .map(|opened| shared.clock.now().saturating_duration_since(opened))
                    .unwrap_or(shared.config.reset_timeout);
                if elapsed >= shared.config.reset_timeout {
                    guard.transition(CircuitState::HalfOpen, shared.clock.millis_since_epoch());
                    guard.trial_in_flight = true;
                    info!(dependency = %shared.dependency, "Circuit breaker half-open, admitting trial call");
                    Ok(self.permit(true))
                } else {
                    guard.rejected_calls += 1;
                    let retry_after = shared.config.reset_timeout - elapsed;
                    debug!(
                        dependency = %shared.dependency,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Circuit breaker rejecting call"
                    );
                    Err(CircuitOpenInfo { dependency: shared.dependency.clone(), retry_after: Some(retry_after) })
                }
            }
            CircuitState::HalfOpen => {
                if guard.trial_in_flight {
                    guard.rejected_calls += 1;
                    debug!(dependency = %shared.dependency, "Trial call in flight, rejecting");
                    Err(CircuitOpenInfo { dependency: shared.dependency.clone(), retry_after: None })
                } else {
                    guard.trial_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// Every `Err` counts as a dependency failure.
    #[instrument(skip(self, operation), fields(dependency = %self.shared.dependency, state = %self.state()))]
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.try_acquire().map_err(BreakerError::Open)?;
        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(source) => {
                permit.fail();
                Err(BreakerError::Failed { source })
            }
        }
    }

    /// Current stored state. An expired open breaker reports `Open` until the
    /// next call attempt.
    pub fn state(&self) -> CircuitState {
        self.shared.state.lock().state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let guard = self.shared.state.lock();
        CircuitBreakerMetrics {
            dependency: self.shared.dependency.clone(),
            state: guard.state,
            failure_count: guard.failure_count,
            failure_threshold: self.shared.config.failure_threshold,
            reset_timeout_seconds: self.shared.config.reset_timeout.as_secs(),
            last_failure_epoch_ms: guard.last_failure_epoch_ms,
            total_calls: guard.total_calls,
            rejected_calls: guard.rejected_calls,
            transitions: guard.transitions,
        }
    }

    /// Most recent transitions, oldest first
    pub fn transition_history(&self) -> Vec<Transition> {
        self.shared.state.lock().history.iter().copied().collect()
    }

    fn permit(&self, trial: bool) -> CallPermit<C> {
        CallPermit { shared: Arc::clone(&self.shared), trial, settled: false }
    }
}

/// Permission for one call. Report the outcome with [`succeed`] or [`fail`];
/// dropping the permit releases it without affecting the failure count.
///
/// [`succeed`]: CallPermit::succeed
/// [`fail`]: CallPermit::fail
#[must_use = "a permit must be settled with succeed() or fail(), or dropped to release it"]
pub struct CallPermit<C: Clock = SystemClock> {
    shared: Arc<Shared<C>>,
    trial: bool,
    settled: bool,
}

impl<C: Clock> CallPermit<C> {
    /// Whether this permit is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        let shared = &self.shared;
        let mut guard = shared.state.lock();
        match guard.state {
            CircuitState::Closed => guard.failure_count = 0,
            CircuitState::HalfOpen if self.trial => {
                guard.transition(CircuitState::Closed, shared.clock.millis_since_epoch());
                guard.trial_in_flight = false;
                guard.failure_count = 0;
                guard.opened_at = None;
                info!(dependency = %shared.dependency, "Circuit breaker closed after successful trial");
            }
            // Stale permit from before the breaker opened
            _ => {}
        }
    }

    pub fn fail(mut self) {
        self.settled = true;
        let shared = &self.shared;
        let now_ms = shared.clock.millis_since_epoch();
        let mut guard = shared.state.lock();
        guard.last_failure_epoch_ms = Some(now_ms);

        match guard.state {
            CircuitState::Closed => {
                guard.failure_count = guard.failure_count.saturating_add(1);
                if guard.failure_count >= shared.config.failure_threshold {
                    guard.transition(CircuitState::Open, now_ms);
                    guard.opened_at = Some(shared.clock.now());
                    warn!(
                        dependency = %shared.dependency,
                        failures = guard.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if self.trial => {
                guard.transition(CircuitState::Open, now_ms);
                guard.trial_in_flight = false;
                guard.opened_at = Some(shared.clock.now());
                warn!(dependency = %shared.dependency, "Trial call failed, circuit breaker re-opened");
            }
            _ => {}
        }
    }
}

impl<C: Clock> Drop for CallPermit<C> {
    fn drop(&mut self) {
        if self.settled || !self.trial {
            return;
        }
        let mut guard = self.shared.state.lock();
        if guard.state == CircuitState::HalfOpen {
            guard.trial_in_flight = false;
            debug!(dependency = %self.shared.dependency, "Trial permit released without verdict");
        }
    }
}

impl<C: Clock> fmt::Debug for CallPermit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("dependency", &self.shared.dependency)
            .field("trial", &self.trial)
            .finish()
    }
}

/// Breakers keyed by dependency name
pub struct BreakerRegistry<C: Clock = SystemClock> {
    default_config: CircuitBreakerConfig,
    configs: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, CircuitBreaker<C>>,
    clock: Arc<C>,
}

impl BreakerRegistry<SystemClock> {
    pub fn new(
        default_config: CircuitBreakerConfig,
        configs: HashMap<String, CircuitBreakerConfig>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(default_config, configs, SystemClock)
    }
}

impl<C: Clock> BreakerRegistry<C> {
    /// Create a registry; every configured dependency gets its breaker up front
    pub fn with_clock(
        default_config: CircuitBreakerConfig,
        configs: HashMap<String, CircuitBreakerConfig>,
        clock: C,
    ) -> Result<Self, ConfigError> {
        default_config.validate()?;
        let clock = Arc::new(clock);
        let breakers = DashMap::new();
        for (name, config) in &configs {
            let breaker = CircuitBreaker::with_shared_clock(name.clone(), *config, Arc::clone(&clock))?;
            breakers.insert(name.clone(), breaker);
        }
        Ok(Self { default_config, configs, breakers, clock })
    }

    /// The breaker for `dependency`, created with the default configuration
    /// if the name is not configured
    pub fn get(&self, dependency: &str) -> Result<CircuitBreaker<C>, ConfigError> {
        if let Some(existing) = self.breakers.get(dependency) {
            return Ok(existing.value().clone());
        }
        let config = self.configs.get(dependency).copied().unwrap_or(self.default_config);
        let created = CircuitBreaker::with_shared_clock(dependency, config, Arc::clone(&self.clock))?;
        let entry = self.breakers.entry(dependency.to_string()).or_insert(created);
        Ok(entry.value().clone())
    }

    /// Metrics for every known dependency, sorted by name
    pub fn snapshot(&self) -> Vec<CircuitBreakerMetrics> {
        let mut metrics: Vec<_> = self.breakers.iter().map(|entry| entry.value().metrics()).collect();
        metrics.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        metrics
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl<C: Clock> fmt::Debug for BreakerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("default_config", &self.default_config)
            .field("dependencies", &self.breakers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::super::MockClock;
    use super::*;

    fn breaker(threshold: u32, timeout_secs: u64) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::new(threshold, Duration::from_secs(timeout_secs));
        (CircuitBreaker::with_clock("image-gen", config, clock.clone()).unwrap(), clock)
    }

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(CircuitBreakerConfig::new(1, Duration::ZERO).validate().is_err());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreaker::new(" ", CircuitBreakerConfig::default()).is_err());
    }

    #[test]
    fn test_opens_after_threshold_consecutive_failures() {
        let (breaker, _clock) = breaker(3, 30);
        for _ in 0..2 {
            breaker.try_acquire().unwrap().fail();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.try_acquire().unwrap().fail();
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = breaker.try_acquire().unwrap_err();
        assert_eq!(rejected.dependency, "image-gen");
        assert_eq!(rejected.retry_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (breaker, _clock) = breaker(3, 30);
        breaker.try_acquire().unwrap().fail();
        breaker.try_acquire().unwrap().fail();
        breaker.try_acquire().unwrap().succeed();
        breaker.try_acquire().unwrap().fail();
        breaker.try_acquire().unwrap().fail();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_count, 2);
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let (breaker, clock) = breaker(1, 10);
        breaker.try_acquire().unwrap().fail();

        clock.advance_secs(5);
        assert_eq!(breaker.try_acquire().unwrap_err().retry_after, Some(Duration::from_secs(5)));

        clock.advance_secs(5);
        let trial = breaker.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.try_acquire().unwrap_err().retry_after, None);

        trial.succeed();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_failed_trial_reopens_and_restarts_timer() {
        let (breaker, clock) = breaker(1, 10);
        breaker.try_acquire().unwrap().fail();
        clock.advance_secs(10);
        breaker.try_acquire().unwrap().fail();
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance_secs(9);
        assert!(breaker.try_acquire().is_err());
        clock.advance_secs(1);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_dropped_trial_releases_slot() {
        let (breaker, clock) = breaker(1, 10);
        breaker.try_acquire().unwrap().fail();
        clock.advance_secs(10);

        drop(breaker.try_acquire().unwrap());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        let second = breaker.try_acquire().unwrap();
        assert!(second.is_trial());
    }

    #[test]
    fn test_stale_permit_does_not_close_breaker() {
        let (breaker, clock) = breaker(1, 10);
        let stale = breaker.try_acquire().unwrap();
        breaker.try_acquire().unwrap().fail();
        clock.advance_secs(10);
        let trial = breaker.try_acquire().unwrap();

        stale.succeed();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        trial.fail();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_transition_history_only_legal_edges() {
        let (breaker, clock) = breaker(2, 5);
        for round in 0..3 {
            breaker.try_acquire().unwrap().fail();
            breaker.try_acquire().unwrap().fail();
            clock.advance_secs(5);
            let trial = breaker.try_acquire().unwrap();
            if round % 2 == 0 {
                trial.fail();
                clock.advance_secs(5);
                breaker.try_acquire().unwrap().succeed();
            } else {
                trial.succeed();
            }
        }

        let history = breaker.transition_history();
        assert!(!history.is_empty());
        assert_eq!(history[0].from, CircuitState::Closed);
        for pair in history.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
        assert!(history.iter().all(|t| t.from.can_transition_to(t.to)));
        assert_eq!(breaker.metrics().transitions, history.len() as u64);
    }

    #[test]
    fn test_never_closed_to_half_open() {
        assert!(!CircuitState::Closed.can_transition_to(CircuitState::HalfOpen));
        assert!(!CircuitState::Open.can_transition_to(CircuitState::Closed));
        assert!(CircuitState::HalfOpen.can_transition_to(CircuitState::Open));
    }

    #[test]
    fn test_open_info_converts_to_circuit_open_error() {
        let (breaker, _clock) = breaker(1, 30);
        breaker.try_acquire().unwrap().fail();
        let err = breaker.try_acquire().unwrap_err().into_error();
        assert_eq!(err.code(), "DEP-CIR-001");
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.retry_after_secs(), Some(30));
    }

    #[tokio::test]
    async fn test_call_skips_operation_when_open() {
        let (breaker, _clock) = breaker(1, 30);
        let invocations = AtomicU32::new(0);

        let first = breaker
            .call(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Boom)
            })
            .await;
        assert!(matches!(first, Err(BreakerError::Failed { .. })));

        let second = breaker
            .call(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Boom>(())
            })
            .await;
        assert!(matches!(second, Err(BreakerError::Open(_))));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_metrics_count_rejections() {
        let (breaker, _clock) = breaker(1, 30);
        breaker.try_acquire().unwrap().fail();
        let _ = breaker.try_acquire();
        let _ = breaker.try_acquire();

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.rejected_calls, 2);
        assert_eq!(metrics.state, CircuitState::Open);
        assert_eq!(metrics.last_failure_epoch_ms, Some(0));
    }

    #[test]
    fn test_registry_isolates_dependencies() {
        let clock = MockClock::new();
        let mut configs = HashMap::new();
        configs.insert("image-gen".to_string(), CircuitBreakerConfig::new(1, Duration::from_secs(30)));
        configs.insert("story-gen".to_string(), CircuitBreakerConfig::new(5, Duration::from_secs(30)));
        let registry = BreakerRegistry::with_clock(CircuitBreakerConfig::default(), configs, clock).unwrap();

        registry.get("image-gen").unwrap().try_acquire().unwrap().fail();
        assert_eq!(registry.get("image-gen").unwrap().state(), CircuitState::Open);
        assert_eq!(registry.get("story-gen").unwrap().state(), CircuitState::Closed);

        let unknown = registry.get("voice-gen").unwrap();
        assert_eq!(unknown.config().failure_threshold, 5);

        let names: Vec<_> = registry.snapshot().into_iter().map(|m| m.dependency).collect();
        assert_eq!(names, vec!["image-gen", "story-gen", "voice-gen"]);
    }
}
