//! # Taleweaver Client
//!
//! Turns structured error responses into scheduled retries with a live
//! countdown.
//!
//! This crate contains:
//! - [`ClientRetryCoordinator`], the per-operation retry state machine
//! - [`CountdownTicker`], the single timer every countdown subscribes to
//!
//! ## State machine
//! ```text
//! Idle -> Loading -> Success
//!                 -> WaitingRetry -> Loading -> ...
//!                 -> Failed -> (manual retry) -> Loading
//! ```

pub mod coordinator;
pub mod ticker;

pub use coordinator::{
    error_from_response, ClientRetryCoordinator, CoordinatorAction, CoordinatorError, Failure,
    RetryState, DEFAULT_RETRY_CAP,
};
pub use ticker::{CountdownTicker, Tick};
