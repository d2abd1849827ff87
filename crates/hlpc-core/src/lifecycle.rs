//! Server lifecycle driven by sentinel markers.
//!
//! A server started with `--start` owns the `ServerRunning` marker for as long
//! as it runs and polls the store for requests left by other invocations:
//!
//! - `ShutdownRequested` (from `--stop`) stops the server.
//! - `OutageRequested` (from `--control --force-outage`) drops every connected
//!   client. The listener keeps running and the marker is consumed.
//!
//! ```text
//! NotStarted -> Starting -> Running -> Stopping -> Stopped
//!                  \
//!                   -> Aborted
//! ```

use crate::config::ServerConfig;
use crate::server::{HlpcServer, ServerHandle};
use crate::store::{LifecycleStore, Marker};
use crate::{HlpcError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Aborted,
}

/// What ended a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    ShutdownRequested,
}

/// Result of a stop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No data directory, so no server could have started.
    NothingRunning,
    /// No running marker; stray markers were cleaned up.
    AlreadyStopped,
    /// The server removed its running marker within the timeout.
    Stopped,
}

/// Result of a force-outage control invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutageOutcome {
    Requested,
    AlreadyPending,
}

/// Drives one process's view of the server lifecycle.
pub struct LifecycleController<S> {
    store: S,
    state: LifecycleState,
}

impl<S: LifecycleStore> LifecycleController<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: LifecycleState::NotStarted,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Check that a server may start: the data directory exists or can be
    /// created, and no other server holds the running marker.
    ///
    /// Shutdown and outage requests left over from an earlier run are
    /// cleared so they cannot act on the new server.
    pub fn preflight(&mut self) -> Result<()> {
        self.state = LifecycleState::Starting;
        info!("Running pre server start checks");

        if let Err(e) = self.store.prepare() {
            error!("Could not prepare the data folder: {}", e);
            self.state = LifecycleState::Aborted;
            return Err(e);
        }

        info!("Checking if the server is already running");
        if self.store.check_marker(Marker::ServerRunning)? {
            let path = self.store.describe(Marker::ServerRunning);
            error!("The server seems to already be running");
            error!("If this is not correct please delete the following file:");
            error!("{}", path);
            self.state = LifecycleState::Aborted;
            return Err(HlpcError::Precondition {
                message: format!("server already running (found {})", path),
            });
        }

        for marker in [Marker::ShutdownRequested, Marker::OutageRequested] {
            if self.store.clear_marker(marker)? {
                warn!("Removed stale {} request from a previous run", marker);
            }
        }

        info!("Pre server start checks finished, proceeding");
        Ok(())
    }

    /// Run preflight, bind, and mark the server as running.
    pub async fn start(&mut self, config: &ServerConfig) -> Result<ServerHandle> {
        self.preflight()?;

        info!("HLPC server is starting...");
        let server =
            match HlpcServer::bind(&config.bind_host, config.bind_port, config.max_sessions).await
            {
                Ok(server) => server,
                Err(e) => {
                    error!("HLPC server could not be started!");
                    error!("{}", e);
                    self.state = LifecycleState::Aborted;
                    return Err(e);
                }
            };

        match self.store.set_marker(Marker::ServerRunning) {
            Ok(true) => {}
            Ok(false) => {
                self.state = LifecycleState::Aborted;
                return Err(HlpcError::Precondition {
                    message: "another server started while this one was binding".to_string(),
                });
            }
            Err(e) => {
                self.state = LifecycleState::Aborted;
                return Err(e);
            }
        }

        let handle = server.start();
        self.state = LifecycleState::Running;
        info!("HLPC server has been started");
        Ok(handle)
    }

    /// Start the server and run it until it is told to stop.
    pub async fn serve<F>(&mut self, config: &ServerConfig, interrupt: F) -> Result<StopReason>
    where
        F: Future<Output = ()>,
    {
        let handle = self.start(config).await?;
        self.run_until_stopped(handle, config.poll_interval, interrupt)
            .await
    }

    /// Poll the store every `poll_interval` until an interrupt or a shutdown
    /// request arrives, then stop the dispatcher and clean up every marker.
    pub async fn run_until_stopped<F>(
        &mut self,
        mut handle: ServerHandle,
        poll_interval: Duration,
        interrupt: F,
    ) -> Result<StopReason>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        let result = loop {
            tokio::select! {
                _ = &mut interrupt => {
                    warn!("Interrupt detected, shutting down the server");
                    break Ok(StopReason::Interrupted);
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }

            match self.poll_markers(&handle) {
                Ok(Some(reason)) => break Ok(reason),
                Ok(None) => {}
                Err(e) => {
                    error!("Could not read lifecycle markers: {}", e);
                    break Err(e);
                }
            }
        };

        self.state = LifecycleState::Stopping;
        handle.shutdown().await;

        match self.cleanup() {
            Ok(()) => info!("Server cleanup finished successfully"),
            Err(e) => {
                warn!("The server was not able to perform a cleanup operation: {}", e);
                warn!("This may cause future problems");
            }
        }

        self.state = LifecycleState::Stopped;
        result
    }

    fn poll_markers(&self, handle: &ServerHandle) -> Result<Option<StopReason>> {
        if self.store.check_marker(Marker::ShutdownRequested)? {
            warn!(
                "{} detected, shutting down server now",
                Marker::ShutdownRequested
            );
            return Ok(Some(StopReason::ShutdownRequested));
        }

        if self.store.check_marker(Marker::OutageRequested)? {
            let dropped = handle.disconnect_all();
            warn!(
                "{} detected, forcing {} client connections to disconnect",
                Marker::OutageRequested,
                dropped
            );
            self.store.clear_marker(Marker::OutageRequested)?;
        }

        Ok(None)
    }

    /// Remove every marker. Missing markers are fine.
    pub fn cleanup(&self) -> Result<()> {
        info!("Attempting server cleanup");
        for marker in Marker::ALL {
            if self.store.clear_marker(marker)? {
                info!("Cleaned up {}", self.store.describe(marker));
            }
        }
        info!("Cleanup complete");
        Ok(())
    }

    /// Ask a running server (another process) to stop and wait for it.
    ///
    /// A server that does not stop within `timeout` is left alone and reported
    /// as a `Timeout` error.
    pub async fn request_stop(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<StopOutcome> {
        if !self.store.is_prepared() {
            info!("No server is currently running");
            return Ok(StopOutcome::NothingRunning);
        }

        if !self.store.check_marker(Marker::ServerRunning)? {
            info!("No server is currently running");
            self.cleanup()?;
            return Ok(StopOutcome::AlreadyStopped);
        }

        info!("Attempting to stop HLPC server...");
        self.store.set_marker(Marker::ShutdownRequested)?;
        info!("Waiting for server to stop...");

        let deadline = Instant::now() + timeout;
        loop {
            if !self.store.check_marker(Marker::ServerRunning)? {
                info!("Server successfully shutdown");
                return Ok(StopOutcome::Stopped);
            }

            let now = Instant::now();
            if now >= deadline {
                error!("Could not shutdown the server, please manually check to see if it is running!");
                return Err(HlpcError::Timeout { waited: timeout });
            }

            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Ask a running server to drop every connected client.
    pub fn request_outage(&self) -> Result<OutageOutcome> {
        if !self.store.is_prepared() {
            return Err(HlpcError::Precondition {
                message: "no data folder found, is the server running?".to_string(),
            });
        }

        if self.store.set_marker(Marker::OutageRequested)? {
            info!("Force outage requested");
            Ok(OutageOutcome::Requested)
        } else {
            warn!("A force outage command is already being processed");
            Ok(OutageOutcome::AlreadyPending)
        }
    }
}
