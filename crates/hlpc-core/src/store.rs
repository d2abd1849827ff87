//! Sentinel marker storage.
//!
//! The lifecycle controller talks to a `LifecycleStore` rather than to the
//! filesystem directly. `FsLifecycleStore` keeps one empty file per marker in
//! the data directory; a marker is set while its file exists.

use crate::config::PathsConfig;
use crate::{HlpcError, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cross-process boolean flags that drive the server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// A server holds the data directory.
    ServerRunning,
    /// A stop invocation asked the running server to exit.
    ShutdownRequested,
    /// A control invocation asked the running server to drop every client.
    OutageRequested,
}

impl Marker {
    pub const ALL: [Marker; 3] = [
        Marker::OutageRequested,
        Marker::ServerRunning,
        Marker::ShutdownRequested,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Marker::ServerRunning => PathsConfig::SERVER_RUNNING_FILENAME,
            Marker::ShutdownRequested => PathsConfig::SHUTDOWN_FILENAME,
            Marker::OutageRequested => PathsConfig::OUTAGE_FILENAME,
        }
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Marker storage backend.
///
/// All operations are synchronous; they are single small filesystem calls.
pub trait LifecycleStore: Send + Sync {
    /// Make the store usable (create the data directory).
    fn prepare(&self) -> Result<()>;

    /// Whether the store has been prepared by some process.
    fn is_prepared(&self) -> bool;

    /// Whether the marker is currently set.
    fn check_marker(&self, marker: Marker) -> Result<bool>;

    /// Set the marker. Returns `false` if it was already set.
    fn set_marker(&self, marker: Marker) -> Result<bool>;

    /// Clear the marker. Returns `false` if it was not set; that is not an error.
    fn clear_marker(&self, marker: Marker) -> Result<bool>;

    /// Human readable location of a marker, for log lines.
    fn describe(&self, marker: Marker) -> String;
}

/// File-backed marker store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct FsLifecycleStore {
    data_dir: PathBuf,
}

impl FsLifecycleStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn marker_path(&self, marker: Marker) -> PathBuf {
        self.data_dir.join(marker.file_name())
    }
}

impl LifecycleStore for FsLifecycleStore {
    fn prepare(&self) -> Result<()> {
        if self.data_dir.is_dir() {
            debug!("Data folder found at {}", self.data_dir.display());
            return Ok(());
        }

        warn!(
            "Data folder not found at {}, attempting to create it",
            self.data_dir.display()
        );
        std::fs::create_dir_all(&self.data_dir).map_err(|e| HlpcError::Precondition {
            message: format!(
                "Could not create the data folder {}: {}",
                self.data_dir.display(),
                e
            ),
        })
    }

    fn is_prepared(&self) -> bool {
        self.data_dir.is_dir()
    }

    fn check_marker(&self, marker: Marker) -> Result<bool> {
        let path = self.marker_path(marker);
        path.try_exists()
            .map_err(|e| HlpcError::io_with_path(e, path))
    }

    fn set_marker(&self, marker: Marker) -> Result<bool> {
        let path = self.marker_path(marker);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(HlpcError::io_with_path(e, path)),
        }
    }

    fn clear_marker(&self, marker: Marker) -> Result<bool> {
        let path = self.marker_path(marker);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(HlpcError::io_with_path(e, path)),
        }
    }

    fn describe(&self, marker: Marker) -> String {
        self.marker_path(marker).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prepared_store() -> (TempDir, FsLifecycleStore) {
        let temp = TempDir::new().unwrap();
        let store = FsLifecycleStore::new(temp.path().join("data"));
        store.prepare().unwrap();
        (temp, store)
    }

    #[test]
    fn test_marker_file_names() {
        assert_eq!(Marker::ServerRunning.file_name(), "serverIsRunning");
        assert_eq!(Marker::ShutdownRequested.file_name(), "shutdownServerNow");
        assert_eq!(Marker::OutageRequested.file_name(), "outageNow");
    }

    #[test]
    fn test_prepare_creates_data_dir() {
        let temp = TempDir::new().unwrap();
        let store = FsLifecycleStore::new(temp.path().join("nested").join("data"));

        assert!(!store.is_prepared());
        store.prepare().unwrap();
        assert!(store.is_prepared());

        // Idempotent
        store.prepare().unwrap();
    }

    #[test]
    fn test_prepare_fails_when_path_is_a_file() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let store = FsLifecycleStore::new(&blocker);
        assert!(matches!(
            store.prepare(),
            Err(HlpcError::Precondition { .. })
        ));
    }

    #[test]
    fn test_set_check_clear_marker() {
        let (_temp, store) = prepared_store();

        assert!(!store.check_marker(Marker::ServerRunning).unwrap());
        assert!(store.set_marker(Marker::ServerRunning).unwrap());
        assert!(store.check_marker(Marker::ServerRunning).unwrap());
        assert!(store.marker_path(Marker::ServerRunning).is_file());

        assert!(store.clear_marker(Marker::ServerRunning).unwrap());
        assert!(!store.check_marker(Marker::ServerRunning).unwrap());
    }

    #[test]
    fn test_set_marker_twice_reports_existing() {
        let (_temp, store) = prepared_store();

        assert!(store.set_marker(Marker::OutageRequested).unwrap());
        assert!(!store.set_marker(Marker::OutageRequested).unwrap());
    }

    #[test]
    fn test_clear_missing_marker_is_not_an_error() {
        let (_temp, store) = prepared_store();
        assert!(!store.clear_marker(Marker::ShutdownRequested).unwrap());
    }

    #[test]
    fn test_set_marker_without_data_dir_is_io_error() {
        let temp = TempDir::new().unwrap();
        let store = FsLifecycleStore::new(temp.path().join("missing"));

        match store.set_marker(Marker::ServerRunning) {
            Err(HlpcError::Io { path, .. }) => {
                assert_eq!(path, Some(store.marker_path(Marker::ServerRunning)));
            }
            other => panic!("Expected Io error, got: {:?}", other),
        }
    }
}
