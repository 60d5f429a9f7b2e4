//! Structured error taxonomy shared by every Taleweaver crate
//!
//! Every failure that crosses a component boundary is expressed as a
//! [`StructuredError`]: a closed [`ErrorKind`] (which fixes the public error
//! code, HTTP status and retryability), a human-readable message, optional
//! details and suggestions, and an immutable [`ErrorContext`] that records
//! where the failure happened and what caused it.
//!
//! # Error Handling Architecture
//!
//! 1. **[`ErrorKind`]**: the closed set of failure classes. Matching on it is
//!    exhaustive, so the API boundary can never silently drop a kind.
//!
//! 2. **[`ErrorCode`]**: the `DOMAIN-CATEGORY-NUMBER` identifier exposed on the
//!    wire. Codes coming back from the network are parsed and validated.
//!
//! 3. **[`ErrorContext`]**: diagnostic metadata (timestamp, `error_id`,
//!    source, operation, severity, arbitrary data). Contexts chain through
//!    `parent_context` so a wrapped failure keeps its causal history.
//!
//! 4. **[`ErrorClassification`]**: the standard interface used by retry logic
//!    to ask "can this be retried, and when?".
//!
//! ## Kind table
//!
//! | Kind | Code | Status | Retryable |
//! |------|------|--------|-----------|
//! | `Validation` | `VAL-INP-001` | 422 | no |
//! | `BadRequest` | `VAL-REQ-002` | 400 | no |
//! | `Unauthenticated` | `AUTH-TOK-001` | 401 | no |
//! | `Forbidden` | `AUTH-PRM-002` | 403 | no |
//! | `RateLimited` | `RATE-LIM-001` | 429 | yes |
//! | `CircuitOpen` | `DEP-CIR-001` | 503 | yes |
//! | `Dependency` | `DEP-SVC-002` | 503 | yes |
//! | `BadGateway` | `NET-GTW-001` | 502 | yes |
//! | `GatewayTimeout` | `NET-TMO-002` | 504 | yes |
//! | `Cancelled` | `REQ-CAN-001` | 499 | no |
//! | `Internal` | `SYS-INT-001` | 500 | no |
//!
//! ## Examples
//!
//! ```rust
//! use std::time::Duration;
//!
//! use taleweaver_common::error::{ErrorClassification, ErrorContext, ErrorKind, Site, StructuredError};
//!
//! const SITE: Site = Site::new("rate_limiter", "check");
//!
//! let err = StructuredError::new(
//!     ErrorKind::RateLimited { retry_after: Duration::from_secs(42) },
//!     "Too many image requests",
//!     ErrorContext::at(SITE),
//! );
//!
//! assert_eq!(err.code(), "RATE-LIM-001");
//! assert_eq!(err.http_status(), 429);
//! assert!(err.is_retryable());
//! assert_eq!(err.retry_after_secs(), Some(42));
//! ```

mod code;
mod context;
mod structured;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use code::{lookup_code, ErrorCode, ErrorKind, KnownCode, KNOWN_CODES};
pub use context::{ContextChain, ErrorContext, Site};
pub use structured::StructuredError;

/// Result alias for operations that fail with a [`StructuredError`]
pub type StructuredResult<T> = Result<T, StructuredError>;

/// Errors raised while constructing taxonomy values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonomyError {
    /// The code does not follow `DOMAIN-CATEGORY-NUMBER`
    #[error("Invalid error code '{code}': expected DOMAIN-CATEGORY-NUMBER")]
    InvalidCode { code: String },

    /// A required context field was empty
    #[error("Error context field '{field}' must not be empty")]
    EmptyField { field: &'static str },
}

/// Error classification trait for consistent retry decisions across modules
///
/// Implemented by [`ErrorKind`] and [`StructuredError`]; collaborators that
/// wrap their own error enums can implement it too so that retry helpers can
/// treat every error uniformly.
pub trait ErrorClassification {
    /// Check if this error is transient and safe to retry
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> Severity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == Severity::Critical
    }

    /// Get the server-provided delay before a retry makes sense, if any
    fn retry_after(&self) -> Option<Duration>;
}

/// Severity levels for logging and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Diagnostic detail
    Debug,
    /// Expected condition, informational only
    Info,
    /// Degraded but operational
    Warning,
    /// Failure requiring attention
    Error,
    /// System integrity at risk
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_display_and_ordering() {
        assert_eq!(Severity::Warning.to_string(), "WARNING");
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Debug < Severity::Info);
    }

    #[test]
    fn test_severity_serializes_uppercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        let parsed: Severity = serde_json::from_str("\"WARNING\"").unwrap();
        assert_eq!(parsed, Severity::Warning);
    }

    #[test]
    fn test_taxonomy_error_messages() {
        let err = TaxonomyError::InvalidCode { code: "nope".to_string() };
        assert!(err.to_string().contains("nope"));
        let err = TaxonomyError::EmptyField { field: "source" };
        assert_eq!(err.to_string(), "Error context field 'source' must not be empty");
    }
}
