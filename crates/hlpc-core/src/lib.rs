//! HLPC Core - length-prefixed TCP message server with marker-file lifecycle.
//!
//! This crate provides the framing codec, the per-connection session loop,
//! the listener/dispatcher and the lifecycle controller used by the
//! `hlpc-server` binary. Start, stop and force-outage requests travel between
//! processes as empty marker files in a shared data directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use hlpc_core::{FsLifecycleStore, LifecycleController, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> hlpc_core::Result<()> {
//!     let config = ServerConfig::new("127.0.0.1", 5540, "./data");
//!     let mut lifecycle = LifecycleController::new(FsLifecycleStore::new(&config.data_dir));
//!
//!     // Runs until Ctrl-C or a `--stop` invocation drops a shutdown marker.
//!     let reason = lifecycle
//!         .serve(&config, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     println!("Stopped: {:?}", reason);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use client::HlpcClient;
pub use config::{LifecycleConfig, NetworkConfig, PathsConfig, ProtocolConfig, ServerConfig};
pub use error::{HlpcError, Result};
pub use lifecycle::{LifecycleController, LifecycleState, OutageOutcome, StopOutcome, StopReason};
pub use server::{HlpcServer, ServerHandle};
pub use session::{Session, SessionOutcome, SessionReport, SessionState};
pub use store::{FsLifecycleStore, LifecycleStore, Marker};
