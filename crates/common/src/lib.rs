//! Shared error taxonomy and request-governance primitives for Taleweaver.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: the error taxonomy (codes, kinds, contexts, structured
//!   errors). No runtime, no logging.
//! - `runtime`: rate limiting, circuit breaking and retry on top of tokio
//! - `test-utils`: deterministic clocks and sleepers for dependent crates

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(all(feature = "runtime", any(feature = "test-utils", test)))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{
    ErrorClassification, ErrorCode, ErrorContext, ErrorKind, Severity, Site, StructuredError,
    StructuredResult,
};
#[cfg(feature = "runtime")]
pub use resilience::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, DependencyCall,
    LimitSpec, MockClock, RateDecision, RateLimiter, RateLimiterConfig, RetryExecutor,
    RetryPolicy, SystemClock,
};
