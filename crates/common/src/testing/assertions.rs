//! Custom assertions for governance tests

// These assertions are designed to panic on failure
#![allow(clippy::missing_panics_doc)]

use std::time::Duration;

/// Assert that a `Result<_, StructuredError>` (or a `StructuredError`) carries
/// a given public error code
#[macro_export]
macro_rules! assert_error_code {
    (@error $error:expr, $code:expr) => {{
        let error: &$crate::error::StructuredError = &$error;
        assert_eq!(error.code(), $code, "unexpected error code for: {}", error);
    }};
    ($result:expr, $code:expr) => {
        match &$result {
            Ok(_) => panic!("Expected error {} but got Ok", $code),
            Err(e) => $crate::assert_error_code!(@error e, $code),
        }
    };
}

/// Assert that a retry run made exactly the expected number of attempts
#[macro_export]
macro_rules! assert_attempts {
    ($outcome:expr, $expected:expr) => {
        assert_eq!(
            $outcome.attempts, $expected,
            "Expected {} attempts but got {}",
            $expected, $outcome.attempts
        );
    };
}

/// Assert that a duration is within an acceptable range
pub fn assert_duration_in_range(actual: Duration, expected: Duration, tolerance: Duration) {
    let min = expected.saturating_sub(tolerance);
    let max = expected + tolerance;

    assert!(actual >= min && actual <= max, "Duration {actual:?} not in range [{min:?}, {max:?}]");
}

/// Assert that every delay is bounded by `max`
pub fn assert_delays_bounded(delays: &[Duration], max: Duration) {
    if let Some((index, delay)) = delays.iter().enumerate().find(|(_, d)| **d > max) {
        panic!("delay #{index} ({delay:?}) exceeds maximum {max:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorContext, ErrorKind, Site, StructuredError};

    #[test]
    fn test_duration_in_range() {
        assert_duration_in_range(Duration::from_millis(105), Duration::from_millis(100), Duration::from_millis(10));
    }

    #[test]
    #[should_panic(expected = "not in range")]
    fn test_duration_out_of_range() {
        assert_duration_in_range(Duration::from_millis(150), Duration::from_millis(100), Duration::from_millis(10));
    }

    #[test]
    #[should_panic(expected = "exceeds maximum")]
    fn test_delays_bounded_panics() {
        assert_delays_bounded(&[Duration::from_millis(1), Duration::from_secs(2)], Duration::from_secs(1));
    }

    #[test]
    fn test_assert_error_code_on_result() {
        let result: Result<(), StructuredError> = Err(StructuredError::new(
            ErrorKind::Validation,
            "missing name",
            ErrorContext::at(Site::new("test", "assert")),
        ));
        crate::assert_error_code!(result, "VAL-INP-001");
    }
}
