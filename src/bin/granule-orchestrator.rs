//! # Granule Orchestrator Service
//!
//! Boots the orchestration core from layered configuration, starts the update queue
//! and the reaper, and runs until interrupted.

use anyhow::Context;
use granule_orchestrator::logging::init_structured_logging;
use granule_orchestrator::OrchestrationCore;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let core = OrchestrationCore::new()
        .await
        .context("failed to initialize orchestration core")?;
    let queue = core.start_update_queue();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = core.spawn_reaper(shutdown_rx);

    info!("🚀 Granule orchestrator running");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("🛑 Shutdown requested");

    shutdown_tx.send(true).ok();
    reaper.await.context("reaper task failed")?;
    let stats = queue
        .shutdown()
        .await
        .context("failed to drain update queue")?;
    info!(
        processed = stats.processed,
        dropped = stats.dropped,
        "Granule orchestrator stopped"
    );
    Ok(())
}
