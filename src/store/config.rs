//! Ledger Store Configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the ledger journal + snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Data directory root (data/ledger/)
    pub data_dir: PathBuf,

    // Concurrency
    /// Bound on acquiring a per-user section or the journal (default: 5 s)
    pub lock_timeout_ms: u64,

    // Journal Settings
    /// fsync every commit before acknowledging it (default: true)
    pub sync_on_commit: bool,

    // Snapshot Settings
    /// Commits between automatic snapshots, 0 disables (default: 10,000)
    pub snapshot_event_threshold: u64,
    /// Number of snapshots to keep (default: 3)
    pub snapshot_keep_count: usize,
}

impl StoreConfig {
    /// Create default configuration with given data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            lock_timeout_ms: 5_000,
            sync_on_commit: true,
            snapshot_event_threshold: 10_000,
            snapshot_keep_count: 3,
        }
    }

    /// Journal directory (data/ledger/wal/)
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// Active journal file (data/ledger/wal/current.wal)
    pub fn wal_file(&self) -> PathBuf {
        self.wal_dir().join("current.wal")
    }

    /// Snapshot directory (data/ledger/snapshots/)
    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("./data/ledger")
    }
}
