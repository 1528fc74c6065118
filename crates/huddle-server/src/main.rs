use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use huddle_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huddle_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", huddle_shared::constants::APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Bind every role, then run them until Ctrl+C
    // -----------------------------------------------------------------------
    let server = Server::bind(&config).await?;

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    server.spawn(&tracker, &cancel);
    tracker.close();

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    cancel.cancel();

    if tokio::time::timeout(Duration::from_secs(5), tracker.wait())
        .await
        .is_err()
    {
        warn!("Shutdown timed out after 5s");
    }
    Ok(())
}
