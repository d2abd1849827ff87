//! Mode handlers for `--start`, `--stop` and `--control`.

use hlpc_core::{
    FsLifecycleStore, LifecycleConfig, LifecycleController, OutageOutcome, ServerConfig,
    StopOutcome,
};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for the interrupt signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Start the server and block until it is interrupted or told to stop.
pub async fn run_start(config: ServerConfig) -> anyhow::Result<()> {
    info!("Ensuring data folder exists at path {}", config.data_dir.display());
    let mut lifecycle = LifecycleController::new(FsLifecycleStore::new(&config.data_dir));

    let handle = lifecycle.start(&config).await?;

    // Parent processes read the port from stdout (useful with --port 0).
    println!("HLPC_PORT={}", handle.addr().port());

    let reason = lifecycle
        .run_until_stopped(handle, config.poll_interval, interrupt_signal())
        .await?;
    info!("HLPC server stopped ({:?})", reason);
    Ok(())
}

/// Ask the server using `data_dir` to stop.
pub async fn run_stop(data_dir: &Path, timeout: Duration) -> anyhow::Result<()> {
    let lifecycle = LifecycleController::new(FsLifecycleStore::new(data_dir));

    match lifecycle
        .request_stop(timeout, LifecycleConfig::STOP_POLL_INTERVAL)
        .await?
    {
        StopOutcome::NothingRunning | StopOutcome::AlreadyStopped => {}
        StopOutcome::Stopped => info!("HLPC server at {} has stopped", data_dir.display()),
    }
    Ok(())
}

/// Send a control command to the server using `data_dir`.
pub fn run_control(data_dir: &Path, force_outage: bool) -> anyhow::Result<()> {
    if !force_outage {
        anyhow::bail!("Could not detect valid control command");
    }

    let lifecycle = LifecycleController::new(FsLifecycleStore::new(data_dir));
    match lifecycle.request_outage()? {
        OutageOutcome::Requested => {
            info!("The running server will disconnect all clients at its next check")
        }
        OutageOutcome::AlreadyPending => {}
    }
    Ok(())
}
