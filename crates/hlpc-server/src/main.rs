//! HLPC Server - length-prefixed TCP message server.
//!
//! One binary, three mutually exclusive modes:
//! - `--start` binds the listener and runs until stopped.
//! - `--stop` asks a running server (another process) to shut down.
//! - `--control --force-outage` asks a running server to drop every client.
//!
//! The modes coordinate through marker files in the data directory.

mod commands;
mod platform;

use clap::{ArgGroup, Parser};
use hlpc_core::{LifecycleConfig, NetworkConfig, PathsConfig, ServerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "hlpc-server")]
#[command(about = "This is the HLPC-server")]
#[command(group(ArgGroup::new("mode").required(true).args(["start", "stop", "control"])))]
struct Args {
    /// Start the server (see --host and --port)
    #[arg(long)]
    start: bool,

    /// Stop a running server
    #[arg(long)]
    stop: bool,

    /// Send a command to a running server (see --force-outage)
    #[arg(long)]
    control: bool,

    /// IP address for the server to listen on
    #[arg(short = 'i', long, default_value = NetworkConfig::DEFAULT_HOST)]
    host: String,

    /// Port for the server to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = NetworkConfig::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of concurrently connected clients
    #[arg(long, default_value_t = LifecycleConfig::DEFAULT_MAX_SESSIONS)]
    max_sessions: usize,

    /// Seconds between checks for stop and outage requests
    #[arg(long, default_value_t = LifecycleConfig::POLL_INTERVAL.as_secs())]
    poll_interval: u64,

    /// Seconds to wait for a running server to stop
    #[arg(long, default_value_t = LifecycleConfig::STOP_TIMEOUT.as_secs())]
    stop_timeout: u64,

    /// Simulate a power outage on a running server
    #[arg(long = "force-outage")]
    force_outage: bool,

    /// Directory holding the marker files (defaults to `data` next to the executable)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(debug: bool, json: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Default data directory: `data` next to the executable.
fn default_data_dir() -> anyhow::Result<PathBuf> {
    let exe_path = std::env::current_exe()?;
    let exe_dir = exe_path
        .parent()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("executable path has no parent directory"))?;
    Ok(exe_dir.join(PathsConfig::DATA_DIR_NAME))
}

async fn run(args: Args) -> anyhow::Result<()> {
    platform::check_supported_platform()?;

    let data_dir = match args.data_dir {
        Some(path) => path,
        None => default_data_dir()?,
    };

    if args.start {
        let config = ServerConfig::new(args.host, args.port, data_dir)
            .with_max_sessions(args.max_sessions)
            .with_poll_interval(Duration::from_secs(args.poll_interval.max(1)));
        commands::run_start(config).await
    } else if args.stop {
        commands::run_stop(&data_dir, Duration::from_secs(args.stop_timeout)).await
    } else {
        commands::run_control(&data_dir, args.force_outage)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug, args.json_logs);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
