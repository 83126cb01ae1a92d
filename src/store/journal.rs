//! Journal sinks
//!
//! Business-layer journal operations, built on top of [`crate::wal`].
//! [`JournalSink`] is the seam between the store and the medium: a file for
//! production, a byte buffer for embedded use and tests.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use crate::core_types::SeqNum;
use crate::wal::{WalEntryType, WalWriter};

/// Append-only destination for journal records
pub trait JournalSink: Send {
    /// Append one record, returning its seq_id
    fn append(&mut self, entry_type: WalEntryType, payload: &[u8]) -> io::Result<SeqNum>;

    /// Make everything appended so far durable
    fn sync(&mut self) -> io::Result<()>;

    /// Sequence number the next append will receive
    fn next_seq(&self) -> SeqNum;
}

/// Serialize a payload for the journal
pub fn encode<T: Serialize>(payload: &T) -> io::Result<Vec<u8>> {
    bincode::serialize(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

// ============================================================
// File Journal
// ============================================================

pub struct FileJournal {
    writer: WalWriter<BufWriter<File>>,
    path: PathBuf,
}

impl FileJournal {
    /// Open (or create) the journal file for appending
    pub fn open(path: impl AsRef<Path>, epoch: u32, next_seq: SeqNum) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: WalWriter::new(BufWriter::new(file), epoch, next_seq),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn epoch(&self) -> u32 {
        self.writer.epoch()
    }
}

impl JournalSink for FileJournal {
    fn append(&mut self, entry_type: WalEntryType, payload: &[u8]) -> io::Result<SeqNum> {
        self.writer.write_entry(entry_type, payload)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().get_ref().sync_data()
    }

    fn next_seq(&self) -> SeqNum {
        self.writer.next_seq()
    }
}

// ============================================================
// Memory Journal
// ============================================================

/// Journal kept in a byte buffer (same record format as the file journal)
pub struct MemoryJournal {
    writer: WalWriter<Vec<u8>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self {
            writer: WalWriter::new(Vec::new(), 1, 1),
        }
    }

    /// Raw journal bytes written so far
    pub fn bytes(&self) -> &[u8] {
        self.writer.get_ref()
    }
}

impl Default for MemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl JournalSink for MemoryJournal {
    fn append(&mut self, entry_type: WalEntryType, payload: &[u8]) -> io::Result<SeqNum> {
        self.writer.write_entry(entry_type, payload)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn next_seq(&self) -> SeqNum {
        self.writer.next_seq()
    }
}

// ============================================================
// Unit Tests
// ============================================================
