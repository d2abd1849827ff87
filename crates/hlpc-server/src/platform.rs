//! Supported platform gate.

use tracing::info;

const SUPPORTED: [&str; 3] = ["linux", "windows", "macos"];

/// Return the detected OS, or an error if the server does not support it.
pub fn check_supported_platform() -> anyhow::Result<&'static str> {
    check_platform(std::env::consts::OS)
}

fn check_platform(os: &'static str) -> anyhow::Result<&'static str> {
    if SUPPORTED.contains(&os) {
        info!("{} operating system detected", os);
        Ok(os)
    } else {
        anyhow::bail!("Unsupported operating system detected: {}", os)
    }
}
