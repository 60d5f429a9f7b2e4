//! Taleweaver API server

use anyhow::Context;
use taleweaver_api::{config, observability, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading configuration so it can set TALEWEAVER_*
    let dotenv = dotenvy::dotenv();

    let config = config::load().context("failed to load configuration")?;
    observability::init_tracing(&config.logging);

    match dotenv {
        Ok(path) => tracing::info!(path = %path.display(), "Loaded .env"),
        Err(e) => tracing::debug!(error = %e, "No .env file loaded"),
    }
    tracing::info!(
        bind = %config.server.bind,
        limit_types = config.rate_limits.len(),
        dependencies = config.dependencies.len(),
        "Taleweaver starting"
    );

    server::serve(config, server::ctrl_c()).await
}
