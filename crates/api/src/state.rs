//! Shared application state - dependency injection container

use std::sync::Arc;
use std::time::Duration;

use taleweaver_common::resilience::{
    BreakerRegistry, CircuitBreakerConfig, Clock, RateLimiter, RetryExecutor, RetryPolicy,
    SystemClock,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::{GenerationBackend, HttpGenerationBackend};
use crate::config::{ConfigError, GovernanceConfig};

/// Type alias for generation backend trait object
pub type DynGenerationBackend = dyn GenerationBackend + 'static;

/// Everything a handler needs, cheap to clone
pub struct AppState<C: Clock = SystemClock> {
    pub limiter: Arc<RateLimiter<C>>,
    pub executor: RetryExecutor<C>,
    pub policy: Arc<RetryPolicy>,
    pub backend: Arc<DynGenerationBackend>,
    /// Cancelled on shutdown; every request's retry run hangs off a child token
    pub shutdown: CancellationToken,
}

impl<C: Clock> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            executor: self.executor.clone(),
            policy: Arc::clone(&self.policy),
            backend: Arc::clone(&self.backend),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl AppState<SystemClock> {
    /// Build production state with the HTTP generation backend
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &GovernanceConfig) -> Result<Self, ConfigError> {
        let backend = HttpGenerationBackend::new(&config.backends).map_err(|e| ConfigError::Invalid {
            field: "backends".to_string(),
            message: e.to_string(),
        })?;
        Self::with_clock(config, Arc::new(backend), SystemClock)
    }
}

impl<C: Clock + Clone> AppState<C> {
    /// Build state around any backend and clock
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn with_clock(
        config: &GovernanceConfig,
        backend: Arc<DynGenerationBackend>,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let limiter = RateLimiter::with_clock(config.rate_limiter_config()?, clock.clone())
            .map_err(|e| ConfigError::Invalid { field: "rate_limits".to_string(), message: e.to_string() })?;
        let breakers =
            BreakerRegistry::with_clock(CircuitBreakerConfig::default(), config.breaker_configs(), clock)
                .map_err(|e| ConfigError::Invalid {
                    field: "dependencies".to_string(),
                    message: e.to_string(),
                })?;

        Ok(Self {
            limiter: Arc::new(limiter),
            executor: RetryExecutor::new(Arc::new(breakers)),
            policy: Arc::new(config.retry_policy()?),
            backend,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry<C>> {
        self.executor.breakers()
    }
}

/// Periodically drop rate-limit windows that have expired, until `shutdown`
pub fn spawn_window_pruner<C: Clock>(
    limiter: Arc<RateLimiter<C>>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let pruned = limiter.prune_expired();
                    if pruned > 0 {
                        debug!(pruned, remaining = limiter.tracked_keys(), "Pruned expired rate-limit windows");
                    }
                }
            }
        }
        debug!("Window pruner stopped");
    })
}
