//! Rate-limit middleware for governed routes

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use taleweaver_common::resilience::{Clock, RateLimitInfo, RateLimiter, SystemClock};
use taleweaver_domain::constants::{
    ANONYMOUS_CLIENT, HEADER_CLIENT_ID, HEADER_RATE_LIMIT_LIMIT, HEADER_RATE_LIMIT_REMAINING,
    HEADER_RATE_LIMIT_RESET,
};
use tracing::{debug, warn};

use crate::error::ApiError;

const MAX_CLIENT_ID_LEN: usize = 128;

/// Middleware state: the shared limiter plus the quota this route uses
pub struct RouteLimit<C: Clock = SystemClock> {
    limiter: Arc<RateLimiter<C>>,
    limit_type: &'static str,
}

impl<C: Clock> Clone for RouteLimit<C> {
    fn clone(&self) -> Self {
        Self { limiter: Arc::clone(&self.limiter), limit_type: self.limit_type }
    }
}

impl<C: Clock> RouteLimit<C> {
    pub fn new(limiter: Arc<RateLimiter<C>>, limit_type: &'static str) -> Self {
        Self { limiter, limit_type }
    }

    pub fn limit_type(&self) -> &'static str {
        self.limit_type
    }
}

/// Who is asking: the `x-client-id` header, else `anonymous`
pub fn client_identity(headers: &HeaderMap) -> String {
    headers
        .get(HEADER_CLIENT_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_CLIENT_ID_LEN)
        .map_or_else(|| ANONYMOUS_CLIENT.to_string(), ToString::to_string)
}

/// Count the request against its quota; reject with 429 when exhausted.
///
/// Every response, admitted or not, carries the `X-RateLimit-*` headers.
/// Rejections also carry `Retry-After` (set by [`ApiError`]).
pub async fn rate_limit<C: Clock>(
    State(route): State<RouteLimit<C>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_identity(request.headers());
    let decision = route.limiter.check(&client, route.limit_type);
    let info = decision.info();

    let mut response = match decision.into_result(&client, route.limit_type) {
        Ok(_) => {
            debug!(%client, limit_type = route.limit_type, remaining = info.remaining, "request admitted");
            next.run(request).await
        }
        Err(err) => {
            warn!(%client, limit_type = route.limit_type, "rate limit exceeded");
            ApiError::from(err).into_response()
        }
    };

    apply_rate_limit_headers(response.headers_mut(), &info);
    response
}

/// Write the `X-RateLimit-*` headers
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(HeaderName::from_static(HEADER_RATE_LIMIT_LIMIT), HeaderValue::from(info.limit));
    headers.insert(
        HeaderName::from_static(HEADER_RATE_LIMIT_REMAINING),
        HeaderValue::from(info.remaining),
    );
    headers.insert(
        HeaderName::from_static(HEADER_RATE_LIMIT_RESET),
        HeaderValue::from(info.reset_epoch_secs),
    );
}
