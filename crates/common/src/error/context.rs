//! Immutable diagnostic context attached to every failure

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Severity, TaxonomyError};

/// A failure site known at compile time.
///
/// Intended for `const` items: an empty name panics during const evaluation,
/// which turns into a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    source: &'static str,
    operation: &'static str,
}

impl Site {
    pub const fn new(source: &'static str, operation: &'static str) -> Self {
        assert!(!source.is_empty(), "site source must not be empty");
        assert!(!operation.is_empty(), "site operation must not be empty");
        Self { source, operation }
    }

    pub const fn source(&self) -> &'static str {
        self.source
    }

    pub const fn operation(&self) -> &'static str {
        self.operation
    }
}

/// Context information for error tracking and correlation.
///
/// Created at the failure site and never mutated afterwards: the `with_*`
/// methods consume the value and are meant to be chained right after
/// construction. Wrapping a lower-level failure produces a new context whose
/// `parent_context` is the original, so the full causal history survives
/// retries and re-raises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    timestamp: DateTime<Utc>,
    error_id: Uuid,
    source: String,
    operation: String,
    severity: Severity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    additional_data: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_context: Option<Box<ErrorContext>>,
}

impl ErrorContext {
    /// Create a context for a runtime-named failure site.
    ///
    /// # Errors
    /// Returns [`TaxonomyError::EmptyField`] when `source` or `operation` is
    /// empty or whitespace.
    pub fn new(
        source: impl Into<String>,
        operation: impl Into<String>,
    ) -> Result<Self, TaxonomyError> {
        let source = source.into();
        let operation = operation.into();
        if source.trim().is_empty() {
            return Err(TaxonomyError::EmptyField { field: "source" });
        }
        if operation.trim().is_empty() {
            return Err(TaxonomyError::EmptyField { field: "operation" });
        }
        Ok(Self::from_parts(source, operation))
    }

    /// Create a context for a compile-time failure site
    pub fn at(site: Site) -> Self {
        Self::from_parts(site.source.to_string(), site.operation.to_string())
    }

    /// Names already validated elsewhere (e.g. by a dependency call descriptor)
    pub(crate) fn from_parts(source: String, operation: String) -> Self {
        Self {
            timestamp: Utc::now(),
            error_id: Uuid::new_v4(),
            source,
            operation,
            severity: Severity::Error,
            additional_data: BTreeMap::new(),
            parent_context: None,
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    /// Chain this context onto the failure that caused it
    #[must_use]
    pub fn caused_by(mut self, parent: ErrorContext) -> Self {
        self.parent_context = Some(Box::new(parent));
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn error_id(&self) -> Uuid {
        self.error_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn additional_data(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.additional_data
    }

    pub fn data(&self, key: &str) -> Option<&serde_json::Value> {
        self.additional_data.get(key)
    }

    pub fn parent(&self) -> Option<&ErrorContext> {
        self.parent_context.as_deref()
    }

    /// Iterate from this context down to the root cause
    pub fn chain(&self) -> ContextChain<'_> {
        ContextChain { next: Some(self) }
    }

    /// Number of contexts in the chain, including this one
    pub fn depth(&self) -> usize {
        self.chain().count()
    }

    /// The innermost context
    pub fn root_cause(&self) -> &ErrorContext {
        self.chain().last().unwrap_or(self)
    }

    /// Same context with the causal chain removed
    #[must_use]
    pub fn detached(&self) -> Self {
        Self { parent_context: None, ..self.clone() }
    }
}

/// Iterator over a context and its ancestors
#[derive(Debug, Clone)]
pub struct ContextChain<'a> {
    next: Option<&'a ErrorContext>,
}

impl<'a> Iterator for ContextChain<'a> {
    type Item = &'a ErrorContext;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
