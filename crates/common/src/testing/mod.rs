//! Testing utilities and helpers
//!
//! - **[`assertions`]**: error-code and timing assertions
//! - **[`mocks`]**: recording and never-waking sleepers, scripted operations
//!
//! The mock clock lives with the clock abstraction and is re-exported here.

pub mod assertions;
pub mod mocks;

pub use assertions::{assert_delays_bounded, assert_duration_in_range};
pub use mocks::{PendingSleeper, RecordingSleeper, ScriptedFailure, ScriptedOperation};

pub use crate::resilience::MockClock;
