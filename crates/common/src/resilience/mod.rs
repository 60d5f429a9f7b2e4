//! Request governance for calls into expensive or unreliable dependencies
//!
//! - **Rate limiting** ([`RateLimiter`]): fixed-window quotas per client and
//!   operation class.
//! - **Circuit breaking** ([`CircuitBreaker`], [`BreakerRegistry`]): one
//!   breaker per dependency, failing fast while the dependency is unhealthy.
//! - **Retry** ([`RetryExecutor`]): bounded, classified retries that honour
//!   rate-limit hints, consult the breaker and stop on cancellation.
//!
//! State is per process. Every keyed structure locks per key, never
//! globally, so unrelated clients and dependencies do not contend.
//!
//! Time is injected through [`Clock`] and [`Sleeper`] so all of the above can
//! be driven deterministically in tests.

pub mod circuit_breaker;
pub mod clock;
pub mod rate_limiter;
pub mod retry;

use thiserror::Error;

pub use circuit_breaker::{
    BreakerError, BreakerRegistry, CallPermit, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerMetrics, CircuitOpenInfo, CircuitState, Transition,
};
pub use clock::{Clock, MockClock, Sleeper, SystemClock, TokioSleeper};
pub use rate_limiter::{
    LimitSpec, RateDecision, RateLimitInfo, RateLimiter, RateLimiterConfig, RateWindow,
    DEFAULT_LIMIT_TYPE, IMAGE_GENERATION_LIMIT,
};
pub use retry::{
    DependencyCall, ErrorClassifier, RetryExecutor, RetryOutcome, RetryPolicy, RetryPolicyBuilder,
};

/// Invalid resilience configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;
