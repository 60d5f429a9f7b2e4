//! The error value that travels from a failure site to the API boundary

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};

use super::{ErrorClassification, ErrorContext, ErrorKind, Severity};

const SANITIZED_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

/// A classified failure with its diagnostic context
///
/// The `kind` fixes the code, status and retryability, so the invariant
/// "one code, one status, one retryable value" holds by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredError {
    kind: ErrorKind,
    message: String,
    details: Option<Map<String, Value>>,
    suggestions: Vec<String>,
    context: ErrorContext,
}

impl StructuredError {
    /// Create an error with the kind's default suggestions.
    ///
    /// The context severity is taken from the kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        let kind = normalize(kind);
        let severity = kind.severity();
        Self {
            suggestions: kind.default_suggestions(),
            kind,
            message: message.into(),
            details: None,
            context: context.with_severity(severity),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.get_or_insert_with(Map::new).insert(key.into(), value.into());
        self
    }

    /// Replace the default suggestions
    #[must_use]
    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions = suggestions.into_iter().map(Into::into).collect();
        self
    }

    /// Re-raise under a new kind, chaining the original context as the cause
    #[must_use]
    pub fn wrap(self, kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        Self::new(kind, message, context.caused_by(self.context))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Map<String, Value>> {
        self.details.as_ref()
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// `retry_after` in whole seconds, rounded up and never zero
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after().map(|delay| {
            let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
            secs.max(1)
        })
    }

    /// A copy safe to show to clients.
    ///
    /// Internal errors lose their message and details (only the `error_id`
    /// is kept for correlation); every error loses its causal chain.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let context = self.context.detached();
        if self.kind == ErrorKind::Internal {
            let mut details = Map::new();
            details.insert("error_id".to_string(), Value::String(context.error_id().to_string()));
            Self {
                kind: ErrorKind::Internal,
                message: SANITIZED_MESSAGE.to_string(),
                details: Some(details),
                suggestions: ErrorKind::Internal.default_suggestions(),
                context,
            }
        } else {
            Self { context, ..self.clone() }
        }
    }

    /// Key-value pairs suitable for structured logging
    pub fn as_tracing_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("error_id", self.context.error_id().to_string()),
            ("error_code", self.code().to_string()),
            ("error_type", self.kind.name().to_string()),
            ("source", self.context.source().to_string()),
            ("operation", self.context.operation().to_string()),
            ("chain_depth", self.context.depth().to_string()),
        ];
        match &self.kind {
            ErrorKind::CircuitOpen { dependency, .. } | ErrorKind::Dependency { dependency } => {
                fields.push(("dependency", dependency.clone()));
            }
            _ => {}
        }
        if let Some(retry) = self.retry_after() {
            fields.push(("retry_after_ms", retry.as_millis().to_string()));
        }
        fields
    }
}

/// Enforce payload invariants: a rate limit always carries a positive delay
fn normalize(kind: ErrorKind) -> ErrorKind {
    match kind {
        ErrorKind::RateLimited { retry_after } if retry_after.is_zero() => {
            ErrorKind::RateLimited { retry_after: Duration::from_secs(1) }
        }
        other => other,
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl std::error::Error for StructuredError {}

impl ErrorClassification for StructuredError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    fn severity(&self) -> Severity {
        self.context.severity()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.kind.retry_after()
    }
}
