//! The single conversion from failures to HTTP responses
//!
//! Every non-2xx response is an [`ErrorEnvelope`] built from a sanitized
//! [`StructuredError`]. The unsanitized error, with its full causal chain,
//! is logged once here, keyed by its `error_id`.

use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use taleweaver_common::error::{ErrorContext, ErrorKind, Site, StructuredError};
use taleweaver_domain::{ErrorEnvelope, FieldViolation};

const BOUNDARY: Site = Site::new("api", "handle_request");

/// A failure on its way out of a handler
#[derive(Debug)]
pub struct ApiError(StructuredError);

impl ApiError {
    pub fn new(error: StructuredError) -> Self {
        Self(error)
    }

    /// 422 listing every rejected field
    pub fn validation(operation: &'static str, violations: &[FieldViolation]) -> Self {
        let fields: Vec<serde_json::Value> = violations
            .iter()
            .map(|v| serde_json::json!({"field": v.field, "reason": v.reason}))
            .collect();
        let summary = violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
        Self(
            StructuredError::new(
                ErrorKind::Validation,
                format!("Invalid request: {summary}"),
                ErrorContext::at(Site::new("api", operation)),
            )
            .with_detail("fields", fields),
        )
    }

    /// 400 or 422 for a body axum could not decode
    pub fn from_rejection(operation: &'static str, rejection: &JsonRejection) -> Self {
        let kind = if rejection.status() == StatusCode::UNPROCESSABLE_ENTITY {
            ErrorKind::Validation
        } else {
            ErrorKind::BadRequest
        };
        Self(StructuredError::new(
            kind,
            rejection.body_text(),
            ErrorContext::at(Site::new("api", operation)),
        ))
    }

    pub fn inner(&self) -> &StructuredError {
        &self.0
    }

    pub fn into_inner(self) -> StructuredError {
        self.0
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn log(&self, status: StatusCode) {
        let err = &self.0;
        let error_id = err.context().error_id();
        let chain: Vec<String> = err
            .context()
            .chain()
            .map(|ctx| format!("{}::{}", ctx.source(), ctx.operation()))
            .collect();

        if status.is_server_error() {
            tracing::error!(
                %error_id,
                code = err.code(),
                status = status.as_u16(),
                detail = err.message(),
                ?chain,
                fields = ?err.as_tracing_fields(),
                "Request failed"
            );
        } else {
            tracing::warn!(
                %error_id,
                code = err.code(),
                status = status.as_u16(),
                detail = err.message(),
                ?chain,
                "Request rejected"
            );
        }
    }
}

impl From<StructuredError> for ApiError {
    fn from(error: StructuredError) -> Self {
        Self(error)
    }
}

/// Anything unrecognized becomes an internal error with a fresh id; the
/// message is kept for the server log and dropped from the response
impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self(StructuredError::new(ErrorKind::Internal, format!("{error:#}"), ErrorContext::at(BOUNDARY)))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        self.log(status);

        let public = self.0.sanitized();
        let retry_after = public.retry_after_secs();
        let mut response = (status, Json(ErrorEnvelope::from(&public))).into_response();

        if matches!(status, StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE) {
            if let Some(secs) = retry_after {
                response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
            }
        }
        response
    }
}
