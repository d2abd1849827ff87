//! Centralized configuration for the HLPC server.
//!
//! Protocol constants, lifecycle timings and marker file names live here as
//! associated constants. `ServerConfig` carries the runtime values handed to
//! the core by the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Wire protocol constants shared by server and client.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Fixed width of the ASCII length header. Client and server must agree.
    pub const HEADER_LEN: usize = 64;
    pub const DISCONNECT_MESSAGE: &'static str = "!DISCONNECT";
    pub const ACK_MESSAGE: &'static str = "Msg received";
    pub const MAX_MESSAGE_SIZE: usize = 1_048_576; // 1MB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Lifecycle timings.
pub struct LifecycleConfig;

impl LifecycleConfig {
    pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(20);
    pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_MAX_SESSIONS: usize = 256;
    pub const SESSION_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
}

/// Data directory and marker file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const DATA_DIR_NAME: &'static str = "data";
    pub const SERVER_RUNNING_FILENAME: &'static str = "serverIsRunning";
    pub const SHUTDOWN_FILENAME: &'static str = "shutdownServerNow";
    pub const OUTAGE_FILENAME: &'static str = "outageNow";
}

/// Network defaults for the start mode.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 5540;
}

/// Runtime configuration for a server started with `--start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_host: String,
    pub bind_port: u16,
    /// Directory holding the sentinel marker files.
    pub data_dir: PathBuf,
    /// Upper bound on concurrently connected sessions.
    pub max_sessions: usize,
    /// How often the running server checks for markers.
    pub poll_interval: Duration,
}

impl ServerConfig {
    pub fn new(bind_host: impl Into<String>, bind_port: u16, data_dir: impl AsRef<Path>) -> Self {
        Self {
            bind_host: bind_host.into(),
            bind_port,
            data_dir: data_dir.as_ref().to_path_buf(),
            max_sessions: LifecycleConfig::DEFAULT_MAX_SESSIONS,
            poll_interval: LifecycleConfig::POLL_INTERVAL,
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// `host:port` as handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }
}
