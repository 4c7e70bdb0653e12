use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{Device, Directory};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Progress callbacks of a scan. Calls are fire-and-forget and happen
/// on the scanning thread, so implementations must return quickly.
pub trait Reporter: Send + Sync {
    fn startup(&self, _device: &Device) {}

    fn notify_new_file(&self, _path: &Path) {}

    fn notify_corrupted_file(&self, _path: &Path, _reason: &str) {}

    fn update_state(&self, _directory: &Directory) {}

    fn done(&self, _stats: &ScanStats) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {}

/// Forwards scan progress to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn startup(&self, device: &Device) {
        info!("Scanning device {} at {:?}", device.name, device.url);
    }

    fn notify_new_file(&self, path: &Path) {
        debug!("New file {:?}", path);
    }

    fn notify_corrupted_file(&self, path: &Path, reason: &str) {
        warn!("Corrupted tag in {:?}: {}", path, reason);
    }

    fn update_state(&self, directory: &Directory) {
        debug!("Scanning directory '{}'", directory.relative_path);
    }

    fn done(&self, stats: &ScanStats) {
        info!(
            "Scan done: {} directories, {} new files, {} corrupted, {} errors",
            stats.directories, stats.new_files, stats.corrupted_files, stats.errors
        );
    }
}

/// Shared flag polled by scans at every file and directory boundary.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub directories: usize,
    pub new_directories: usize,
    pub new_files: usize,
    pub updated_files: usize,
    pub new_playlists: usize,
    pub corrupted_files: usize,
    pub errors: usize,
    pub removed_directories: usize,
    pub removed_files: usize,
    pub removed_playlists: usize,
}

impl ScanStats {
    /// Whether the scan added or removed anything.
    pub fn changed(&self) -> bool {
        self.new_directories
            + self.new_files
            + self.updated_files
            + self.new_playlists
            + self.removed_directories
            + self.removed_files
            + self.removed_playlists
            > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed(ScanStats),
    /// The cancel token fired; the catalog holds whatever was reached.
    Cancelled(ScanStats),
    /// The device root is not reachable. Nothing was touched.
    NotMounted,
}

impl RefreshOutcome {
    pub fn stats(&self) -> Option<&ScanStats> {
        match self {
            RefreshOutcome::Completed(stats) | RefreshOutcome::Cancelled(stats) => Some(stats),
            RefreshOutcome::NotMounted => None,
        }
    }
}
