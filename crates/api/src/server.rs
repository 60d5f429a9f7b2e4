//! Server lifecycle

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::GovernanceConfig;
use crate::routes::router;
use crate::state::{spawn_window_pruner, AppState};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Serve until `shutdown` resolves, then drain in-flight requests.
///
/// Pending retry backoffs are cancelled as soon as shutdown begins.
///
/// # Errors
/// Returns an error if state cannot be built or the listener fails.
pub async fn serve<F>(config: GovernanceConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = AppState::from_config(&config).context("failed to build application state")?;
    let pruner =
        spawn_window_pruner(state.limiter.clone(), PRUNE_INTERVAL, state.shutdown.clone());

    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(addr = %listener.local_addr()?, "Taleweaver API listening");

    let token = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutdown requested");
            token.cancel();
        })
        .await
        .context("server error")?;

    pruner.await.context("window pruner panicked")?;
    info!("Taleweaver API stopped");
    Ok(())
}

/// Resolves on Ctrl-C
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
