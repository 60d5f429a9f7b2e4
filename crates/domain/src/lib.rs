//! # Taleweaver Domain
//!
//! Types shared by the API server and its clients.
//!
//! This crate contains:
//! - The error response envelope and its conversion from `StructuredError`
//! - Generation request and response payloads with input validation
//! - Header names, routes and dependency names
//!
//! ## Architecture
//! - Depends only on the foundation tier of `taleweaver-common`
//! - No runtime, no I/O

pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::*;
pub use types::*;
