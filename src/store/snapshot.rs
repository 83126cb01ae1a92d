//! Ledger Snapshot Creation/Loading
//!
//! Atomic snapshot creation with COMPLETE marker and checksum verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::record::AccountRecord;
use crate::core_types::{EntryId, SeqNum};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// ============================================================
// Snapshot Contents
// ============================================================

/// Everything needed to rebuild the store at `wal_seq_id`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerImage {
    pub next_entry_id: EntryId,
    /// Sorted by user id
    pub records: Vec<AccountRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub wal_seq_id: SeqNum,
    pub wal_epoch: u32,
    pub user_count: usize,
    pub entry_count: usize,
    pub ledger_checksum: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================
// Ledger Snapshotter
// ============================================================

pub struct LedgerSnapshotter {
    snapshot_dir: PathBuf,
}

impl LedgerSnapshotter {
    pub fn new(snapshot_dir: impl AsRef<Path>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.as_ref().to_path_buf(),
        }
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// Create an atomic snapshot
    ///
    /// Protocol:
    /// 1. Create .tmp-{timestamp}/
    /// 2. Write ledger.bin (bincode) and fsync it
    /// 3. Calculate CRC64 checksum
    /// 4. Write metadata.json
    /// 5. Write COMPLETE marker
    /// 6. Atomic rename to snapshot-{seq}/
    /// 7. Update latest symlink
    pub fn create_snapshot(
        &self,
        image: &LedgerImage,
        wal_seq_id: SeqNum,
        wal_epoch: u32,
    ) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.snapshot_dir)?;

        // 1. Temporary directory
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let tmp_dir = self.snapshot_dir.join(format!(".tmp-{}", timestamp));
        fs::create_dir_all(&tmp_dir)?;

        // 2. ledger.bin
        let ledger_bytes = bincode::serialize(image)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        {
            let file = File::create(tmp_dir.join("ledger.bin"))?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&ledger_bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        // 3. CRC64
        let checksum = calculate_crc64(&ledger_bytes);

        // 4. metadata.json
        let metadata = SnapshotMetadata {
            format_version: SNAPSHOT_FORMAT_VERSION,
            wal_seq_id,
            wal_epoch,
            user_count: image.records.len(),
            entry_count: image.records.iter().map(|r| r.entries.len()).sum(),
            ledger_checksum: checksum,
            created_at: Utc::now(),
        };
        let metadata_json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(tmp_dir.join("metadata.json"), metadata_json)?;

        // 5. COMPLETE marker
        fs::write(tmp_dir.join("COMPLETE"), "")?;

        // 6. Atomic rename
        let name = snapshot_name(wal_seq_id);
        let snapshot_path = self.snapshot_dir.join(&name);
        if snapshot_path.exists() {
            fs::remove_dir_all(&snapshot_path)?;
        }
        fs::rename(&tmp_dir, &snapshot_path)?;

        // 7. latest symlink (symlink_metadata so a dangling link is replaced too)
        let latest_link = self.snapshot_dir.join("latest");
        if fs::symlink_metadata(&latest_link).is_ok() {
            fs::remove_file(&latest_link)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::symlink;
            symlink(&name, &latest_link)?;
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::symlink_dir;
            symlink_dir(&name, &latest_link)?;
        }

        Ok(snapshot_path)
    }

    /// Load the latest snapshot
    pub fn load_latest_snapshot(&self) -> io::Result<Option<(SnapshotMetadata, LedgerImage)>> {
        let latest_link = self.snapshot_dir.join("latest");

        if !latest_link.exists() {
            return Ok(None);
        }

        if !latest_link.join("COMPLETE").exists() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Incomplete snapshot (missing COMPLETE marker)",
            ));
        }

        let metadata_json = fs::read_to_string(latest_link.join("metadata.json"))?;
        let metadata: SnapshotMetadata = serde_json::from_str(&metadata_json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if metadata.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Unsupported snapshot format version {}",
                    metadata.format_version
                ),
            ));
        }

        let mut ledger_bytes = Vec::new();
        File::open(latest_link.join("ledger.bin"))?.read_to_end(&mut ledger_bytes)?;

        let calculated_checksum = calculate_crc64(&ledger_bytes);
        if calculated_checksum != metadata.ledger_checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Checksum mismatch: expected {}, got {}",
                    metadata.ledger_checksum, calculated_checksum
                ),
            ));
        }

        let image: LedgerImage = bincode::deserialize(&ledger_bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Some((metadata, image)))
    }

    /// Delete all but the newest `keep` snapshots plus leftover temp dirs.
    ///
    /// Returns the number of snapshots removed.
    pub fn prune(&self, keep: usize) -> io::Result<usize> {
        let mut snapshots: Vec<(SeqNum, PathBuf)> = Vec::new();
        for dir_entry in fs::read_dir(&self.snapshot_dir)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(".tmp-") {
                fs::remove_dir_all(dir_entry.path())?;
            } else if let Some(seq) = name
                .strip_prefix("snapshot-")
                .and_then(|s| s.parse::<SeqNum>().ok())
            {
                snapshots.push((seq, dir_entry.path()));
            }
        }

        snapshots.sort_by_key(|(seq, _)| std::cmp::Reverse(*seq));
        let keep = keep.max(1);
        let mut removed = 0;
        for (_, path) in snapshots.into_iter().skip(keep) {
            fs::remove_dir_all(path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

fn snapshot_name(wal_seq_id: SeqNum) -> String {
    format!("snapshot-{}", wal_seq_id)
}

// ============================================================
// CRC64 Checksum
// ============================================================

fn calculate_crc64(data: &[u8]) -> String {
    use crc::{CRC_64_ECMA_182, Crc};

    const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);
    format!("{:016x}", CRC64.checksum(data))
}

// ============================================================
// Unit Tests
// ============================================================
