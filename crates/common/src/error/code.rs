//! Error codes and the closed set of error kinds

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ErrorClassification, Severity, TaxonomyError};

/// `DOMAIN-CATEGORY-NUMBER`, e.g. `RATE-LIM-001`
#[allow(clippy::expect_used)] // literal pattern; compiled by every parse test
static CODE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z]{2,8}-[A-Z]{2,8}-[0-9]{3}$").expect("CODE_REGEX pattern is valid")
});

/// Validated public error code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ErrorCode(String);

impl ErrorCode {
    /// Parse and validate a code against `DOMAIN-CATEGORY-NUMBER`
    pub fn parse(raw: &str) -> Result<Self, TaxonomyError> {
        if CODE_REGEX.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(TaxonomyError::InvalidCode { code: raw.to_string() })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `DOMAIN` segment
    pub fn domain(&self) -> &str {
        self.segment(0)
    }

    /// The `CATEGORY` segment
    pub fn category(&self) -> &str {
        self.segment(1)
    }

    /// The numeric suffix
    pub fn number(&self) -> u16 {
        self.segment(2).parse().unwrap_or_default()
    }

    /// The registered status and retryability for this code, if it is one of
    /// ours
    pub fn known(&self) -> Option<&'static KnownCode> {
        lookup_code(&self.0)
    }

    fn segment(&self, index: usize) -> &str {
        self.0.split('-').nth(index).unwrap_or_default()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ErrorCode {
    type Err = TaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = TaxonomyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

/// Registry entry binding a code to exactly one status and retryability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownCode {
    pub code: &'static str,
    pub http_status: u16,
    pub retryable: bool,
    /// Stable snake_case name used in logs
    pub name: &'static str,
}

const VALIDATION: KnownCode =
    KnownCode { code: "VAL-INP-001", http_status: 422, retryable: false, name: "validation_error" };
const BAD_REQUEST: KnownCode =
    KnownCode { code: "VAL-REQ-002", http_status: 400, retryable: false, name: "bad_request" };
const UNAUTHENTICATED: KnownCode =
    KnownCode { code: "AUTH-TOK-001", http_status: 401, retryable: false, name: "unauthenticated" };
const FORBIDDEN: KnownCode =
    KnownCode { code: "AUTH-PRM-002", http_status: 403, retryable: false, name: "forbidden" };
const RATE_LIMITED: KnownCode =
    KnownCode { code: "RATE-LIM-001", http_status: 429, retryable: true, name: "rate_limited" };
const CIRCUIT_OPEN: KnownCode =
    KnownCode { code: "DEP-CIR-001", http_status: 503, retryable: true, name: "circuit_open" };
const DEPENDENCY: KnownCode =
    KnownCode { code: "DEP-SVC-002", http_status: 503, retryable: true, name: "dependency_error" };
const BAD_GATEWAY: KnownCode =
    KnownCode { code: "NET-GTW-001", http_status: 502, retryable: true, name: "bad_gateway" };
const GATEWAY_TIMEOUT: KnownCode =
    KnownCode { code: "NET-TMO-002", http_status: 504, retryable: true, name: "gateway_timeout" };
const CANCELLED: KnownCode =
    KnownCode { code: "REQ-CAN-001", http_status: 499, retryable: false, name: "cancelled" };
const INTERNAL: KnownCode =
    KnownCode { code: "SYS-INT-001", http_status: 500, retryable: false, name: "internal_error" };

/// Every code the taxonomy can produce
pub const KNOWN_CODES: [KnownCode; 11] = [
    VALIDATION,
    BAD_REQUEST,
    UNAUTHENTICATED,
    FORBIDDEN,
    RATE_LIMITED,
    CIRCUIT_OPEN,
    DEPENDENCY,
    BAD_GATEWAY,
    GATEWAY_TIMEOUT,
    CANCELLED,
    INTERNAL,
];

/// Look up the registry entry for a raw code string
pub fn lookup_code(code: &str) -> Option<&'static KnownCode> {
    KNOWN_CODES.iter().find(|known| known.code == code)
}

/// Closed set of failure classes
///
/// The kind alone determines the public code, HTTP status and retryability.
/// Payload fields carry the data a caller needs to act on the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Semantically invalid input (422)
    Validation,
    /// Malformed request (400)
    BadRequest,
    /// Missing or invalid credentials (401)
    Unauthenticated,
    /// Authenticated but not allowed (403)
    Forbidden,
    /// Quota exhausted; `retry_after` says when capacity frees up
    RateLimited { retry_after: Duration },
    /// The breaker guarding `dependency` is rejecting calls
    CircuitOpen { dependency: String, retry_after: Option<Duration> },
    /// An external dependency reported a failure
    Dependency { dependency: String },
    /// Upstream answered with garbage or refused the connection (502)
    BadGateway,
    /// Upstream did not answer in time (504)
    GatewayTimeout,
    /// The caller went away before the operation finished
    Cancelled,
    /// Anything we did not anticipate (500)
    Internal,
}

impl ErrorKind {
    fn known(&self) -> &'static KnownCode {
        match self {
            Self::Validation => &KNOWN_CODES[0],
            Self::BadRequest => &KNOWN_CODES[1],
            Self::Unauthenticated => &KNOWN_CODES[2],
            Self::Forbidden => &KNOWN_CODES[3],
            Self::RateLimited { .. } => &KNOWN_CODES[4],
            Self::CircuitOpen { .. } => &KNOWN_CODES[5],
            Self::Dependency { .. } => &KNOWN_CODES[6],
            Self::BadGateway => &KNOWN_CODES[7],
            Self::GatewayTimeout => &KNOWN_CODES[8],
            Self::Cancelled => &KNOWN_CODES[9],
            Self::Internal => &KNOWN_CODES[10],
        }
    }

    /// Public `DOMAIN-CATEGORY-NUMBER` code
    pub fn code(&self) -> &'static str {
        self.known().code
    }

    pub fn http_status(&self) -> u16 {
        self.known().http_status
    }

    /// Stable snake_case name for logs and metrics
    pub fn name(&self) -> &'static str {
        self.known().name
    }

    /// Whether this kind is evidence that a dependency is unhealthy.
    ///
    /// Rate limiting, caller mistakes and cancellation say nothing about the
    /// dependency's health and must not trip a breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            Self::Dependency { .. } | Self::BadGateway | Self::GatewayTimeout | Self::Internal
        )
    }

    /// Suggestions shown to end users when the failure site gives none
    pub fn default_suggestions(&self) -> Vec<String> {
        let suggestions: &[&str] = match self {
            Self::Validation | Self::BadRequest => {
                &["Check the highlighted fields and submit again."]
            }
            Self::Unauthenticated => &["Sign in again to continue."],
            Self::Forbidden => &["Ask the owner of this character for access."],
            Self::RateLimited { .. } => &[
                "Wait for the countdown to finish; the request will be retried automatically.",
                "Generating fewer images at once keeps you under the limit.",
            ],
            Self::CircuitOpen { .. } | Self::Dependency { .. } => &[
                "The generation service is temporarily unavailable.",
                "Your request will be retried once the service recovers.",
            ],
            Self::BadGateway | Self::GatewayTimeout => {
                &["The generation service did not respond; please try again."]
            }
            Self::Cancelled => &["Start the generation again when you are ready."],
            Self::Internal => &["Please try again later. If the problem persists, contact support."],
        };
        suggestions.iter().map(|s| (*s).to_string()).collect()
    }
}

impl ErrorClassification for ErrorKind {
    fn is_retryable(&self) -> bool {
        self.known().retryable
    }

    fn severity(&self) -> Severity {
        match self {
            Self::Validation | Self::BadRequest | Self::Cancelled => Severity::Info,
            Self::Unauthenticated
            | Self::Forbidden
            | Self::RateLimited { .. }
            | Self::CircuitOpen { .. } => Severity::Warning,
            Self::Dependency { .. } | Self::BadGateway | Self::GatewayTimeout => Severity::Error,
            Self::Internal => Severity::Critical,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
