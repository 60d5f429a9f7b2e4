//! # Taleweaver API
//!
//! HTTP boundary for illustration and story generation.
//!
//! This crate contains:
//! - Governance configuration loading ([`config`])
//! - Logging setup ([`observability`])
//! - The uniform error response ([`error`])
//! - Rate-limit middleware and headers ([`middleware`])
//! - Generation backends and their error classifier ([`backend`])
//! - Routes wired through the retry executor ([`routes`])
//! - Server startup and shutdown ([`server`])

pub mod backend;
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{GovernanceConfig, LogFormat};
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
