//! Fixed-window rate limiting keyed by client and operation class
//!
//! Each `limit_type` (for example `default` or `image_generation`) has its own
//! `{max_requests, window_seconds}` quota, so cheap and expensive operations
//! are governed independently. Windows are aligned to the epoch:
//! `window_id = floor(now / window_seconds)`.
//!
//! Every `(limit_type, client)` key owns its own mutex. The map lookup only
//! holds a shard lock long enough to clone the slot's `Arc`; the
//! reset-then-test-and-increment sequence runs under the per-key lock, so
//! unrelated clients never serialize against each other and two concurrent
//! requests can never both take the last slot of a window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Clock, ConfigError, SystemClock};
use crate::error::{ErrorContext, ErrorKind, Site, StructuredError};

/// Limit type used when a route does not name one, and as the fallback for
/// unknown names
pub const DEFAULT_LIMIT_TYPE: &str = "default";
/// Limit type for image generation requests
pub const IMAGE_GENERATION_LIMIT: &str = "image_generation";

const CHECK_SITE: Site = Site::new("rate_limiter", "check");

/// Quota for one limit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSpec {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl LimitSpec {
    pub const fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self { max_requests, window_seconds }
    }

    /// Validate the quota
    pub fn validate(&self, limit_type: &str) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::Invalid {
                message: format!("rate limit '{limit_type}': max_requests must be greater than 0"),
            });
        }
        if self.window_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: format!("rate limit '{limit_type}': window_seconds must be greater than 0"),
            });
        }
        Ok(())
    }

    fn window_millis(&self) -> u64 {
        self.window_seconds.saturating_mul(1000)
    }
}

/// Quotas per limit type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    limits: HashMap<String, LimitSpec>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert(DEFAULT_LIMIT_TYPE.to_string(), LimitSpec::new(100, 60));
        limits.insert(IMAGE_GENERATION_LIMIT.to_string(), LimitSpec::new(10, 60));
        Self { limits }
    }
}

impl RateLimiterConfig {
    /// Defaults plus the given overrides
    pub fn with_limits<I, S>(limits: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, LimitSpec)>,
        S: Into<String>,
    {
        let mut config = Self::default();
        for (name, spec) in limits {
            config.limits.insert(name.into(), spec);
        }
        config.validate()?;
        Ok(config)
    }

    /// Set a single limit type (builder style)
    #[must_use]
    pub fn limit(mut self, limit_type: impl Into<String>, spec: LimitSpec) -> Self {
        self.limits.insert(limit_type.into(), spec);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.iter().try_for_each(|(name, spec)| spec.validate(name))
    }

    /// Resolve a limit type, falling back to `default`
    pub fn resolve<'a>(&'a self, limit_type: &'a str) -> (&'a str, LimitSpec) {
        match self.limits.get(limit_type) {
            Some(spec) => (limit_type, *spec),
            None => {
                let spec = self
                    .limits
                    .get(DEFAULT_LIMIT_TYPE)
                    .copied()
                    .unwrap_or_else(|| LimitSpec::new(100, 60));
                (DEFAULT_LIMIT_TYPE, spec)
            }
        }
    }

    pub fn limit_types(&self) -> impl Iterator<Item = (&str, &LimitSpec)> {
        self.limits.iter().map(|(name, spec)| (name.as_str(), spec))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    limit_type: String,
    client: String,
}

/// Counter for one key's current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub window_id: u64,
    pub count: u32,
    pub max_requests: u32,
    pub window_seconds: u64,
}

/// Values for the `X-RateLimit-*` response headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// End of the current window, in seconds since the epoch
    pub reset_epoch_secs: u64,
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allow(RateLimitInfo),
    Deny {
        /// `window_start + window_seconds - now`; always positive
        retry_after: Duration,
        info: RateLimitInfo,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    pub fn info(&self) -> RateLimitInfo {
        match self {
            Self::Allow(info) | Self::Deny { info, .. } => *info,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Allow(_) => None,
            Self::Deny { retry_after, .. } => Some(*retry_after),
        }
    }

    /// Convert into a result, turning a denial into a `RATE-LIM-001` error
    pub fn into_result(self, client: &str, limit_type: &str) -> Result<RateLimitInfo, StructuredError> {
        match self {
            Self::Allow(info) => Ok(info),
            Self::Deny { retry_after, info } => Err(StructuredError::new(
                ErrorKind::RateLimited { retry_after },
                format!("Rate limit exceeded for '{limit_type}'"),
                ErrorContext::at(CHECK_SITE)
                    .with_data("client", client)
                    .with_data("limit_type", limit_type),
            )
            .with_detail("limit", info.limit)
            .with_detail("limit_type", limit_type)
            .with_detail("reset", info.reset_epoch_secs)),
        }
    }
}

/// Per-key fixed-window rate limiter
///
/// # Examples
///
/// ```rust
/// use taleweaver_common::resilience::{LimitSpec, MockClock, RateLimiter, RateLimiterConfig};
///
/// let clock = MockClock::new();
/// let config = RateLimiterConfig::default().limit("default", LimitSpec::new(2, 60));
/// let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();
///
/// assert!(limiter.check("alice", "default").is_allowed());
/// clock.advance_secs(1);
/// assert!(limiter.check("alice", "default").is_allowed());
/// clock.advance_secs(1);
/// let denied = limiter.check("alice", "default");
/// assert_eq!(denied.retry_after().map(|d| d.as_secs()), Some(58));
/// ```
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    windows: DashMap<WindowKey, Arc<Mutex<RateWindow>>>,
    clock: Arc<C>,
}

impl RateLimiter<SystemClock> {
    pub fn new(config: RateLimiterConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a rate limiter with a custom clock (useful for testing)
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, windows: DashMap::new(), clock: Arc::new(clock) })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Count a request against `client`'s quota for `limit_type`
    pub fn check(&self, client: &str, limit_type: &str) -> RateDecision {
        self.evaluate(client, limit_type, true)
    }

    /// Report the current quota without consuming a slot
    pub fn peek(&self, client: &str, limit_type: &str) -> RateLimitInfo {
        self.evaluate(client, limit_type, false).info()
    }

    /// Forget one key's window
    pub fn reset(&self, client: &str, limit_type: &str) {
        let (resolved, _) = self.config.resolve(limit_type);
        let key = WindowKey { limit_type: resolved.to_string(), client: client.to_string() };
        self.windows.remove(&key);
    }

    /// Drop windows that belong to a past window period.
    ///
    /// A slot that a concurrent `check` has already cloned is kept even when
    /// stale; removing it would let the next request start a fresh count in
    /// the same window. `retain` holds the shard write lock, so no new clone
    /// can appear while a slot is inspected.
    ///
    /// Returns the number of removed keys.
    pub fn prune_expired(&self) -> usize {
        let now_ms = self.clock.millis_since_epoch();
        let before = self.windows.len();
        self.windows.retain(|key, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let (_, spec) = self.config.resolve(&key.limit_type);
            let current = now_ms / spec.window_millis().max(1);
            slot.lock().window_id >= current
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Pruned expired rate-limit windows");
        }
        removed
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn evaluate(&self, client: &str, limit_type: &str, consume: bool) -> RateDecision {
        let (resolved, spec) = self.config.resolve(limit_type);
        let now_ms = self.clock.millis_since_epoch();
        let window_ms = spec.window_millis();
        let window_id = now_ms / window_ms;
        let window_start = window_id * window_ms;
        let window_end = window_start + window_ms;
        let reset_epoch_secs = window_end / 1000;

        let slot = self.slot(resolved, client, window_id, spec);
        let mut window = slot.lock();

        if window.window_id != window_id {
            window.window_id = window_id;
            window.count = 0;
        }
        window.max_requests = spec.max_requests;
        window.window_seconds = spec.window_seconds;

        let over_limit = window.count.saturating_add(1) > spec.max_requests;
        if !consume || over_limit {
            let info = RateLimitInfo {
                limit: spec.max_requests,
                remaining: spec.max_requests.saturating_sub(window.count),
                reset_epoch_secs,
            };
            if !consume {
                return RateDecision::Allow(info);
            }
            let retry_after = Duration::from_millis(window_end - now_ms);
            warn!(
                client,
                limit_type = resolved,
                count = window.count,
                max_requests = spec.max_requests,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            return RateDecision::Deny { retry_after, info };
        }

        window.count += 1;
        let remaining = spec.max_requests - window.count;
        debug!(client, limit_type = resolved, count = window.count, remaining, "Request admitted");
        RateDecision::Allow(RateLimitInfo { limit: spec.max_requests, remaining, reset_epoch_secs })
    }

    fn slot(&self, limit_type: &str, client: &str, window_id: u64, spec: LimitSpec) -> Arc<Mutex<RateWindow>> {
        let key = WindowKey { limit_type: limit_type.to_string(), client: client.to_string() };
        if let Some(existing) = self.windows.get(&key) {
            return Arc::clone(existing.value());
        }
        let entry = self.windows.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(RateWindow {
                window_id,
                count: 0,
                max_requests: spec.max_requests,
                window_seconds: spec.window_seconds,
            }))
        });
        Arc::clone(entry.value())
    }
}

impl<C: Clock> std::fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked_keys", &self.windows.len())
            .finish()
    }
}
