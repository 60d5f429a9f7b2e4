//! Wire format for error responses
//!
//! Every non-2xx response from the API carries the same envelope:
//!
//! ```json
//! {"error": {"code": "RATE-LIM-001", "message": "...", "details": null,
//!            "retryable": true, "retry_after": 42, "suggestions": ["..."]}}
//! ```

use serde::{Deserialize, Serialize};
use taleweaver_common::error::{
    ErrorClassification, ErrorCode, StructuredError, TaxonomyError,
};
use uuid::Uuid;

/// Top-level error response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiErrorBody,
}

impl ErrorEnvelope {
    pub fn new(error: ApiErrorBody) -> Self {
        Self { error }
    }

    /// Parse a response body
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }
}

impl From<&StructuredError> for ErrorEnvelope {
    fn from(err: &StructuredError) -> Self {
        Self { error: ApiErrorBody::from(err) }
    }
}

/// The `error` object of an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// `DOMAIN-CATEGORY-NUMBER`; kept raw so a malformed code from the wire
    /// can still be reported instead of failing the whole parse
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
    /// Seconds until a retry may succeed
    #[serde(default)]
    pub retry_after: Option<u64>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Correlation id for server-side logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<Uuid>,
}

impl ApiErrorBody {
    /// Validate the raw code
    pub fn parsed_code(&self) -> Result<ErrorCode, TaxonomyError> {
        ErrorCode::parse(&self.code)
    }

    pub fn into_envelope(self) -> ErrorEnvelope {
        ErrorEnvelope::new(self)
    }
}

impl From<&StructuredError> for ApiErrorBody {
    fn from(err: &StructuredError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.message().to_string(),
            details: err.details().cloned().map(serde_json::Value::Object),
            retryable: err.is_retryable(),
            retry_after: err.retry_after_secs(),
            suggestions: err.suggestions().to_vec(),
            error_id: Some(err.context().error_id()),
        }
    }
}
