//! Ledger Journal Format
//!
//! A type-extensible, binary write-ahead format with:
//! - 24-byte naturally aligned header
//! - CRC32 checksum for integrity
//! - Epoch per process lifetime (bumped on every recovery)
//! - bincode serialization for payloads
//!
//! # Header Layout (24 bytes)
//!
//! ```text
//! ┌────────────┬───────────┬────────────────────────────────────┐
//! │ seq_id     │ 8 bytes   │ Monotonic sequence number          │
//! │ epoch      │ 4 bytes   │ Writer epoch                       │
//! │ checksum   │ 4 bytes   │ CRC32 of payload                   │
//! │ payload_len│ 4 bytes   │ Payload size                       │
//! │ entry_type │ 1 byte    │ AccountOpened/Commit/...           │
//! │ version    │ 1 byte    │ Payload format version (0-255)     │
//! │ reserved   │ 2 bytes   │ Zero                               │
//! └────────────┴───────────┴────────────────────────────────────┘
//! ```
//!
//! A record cut short by a crash (partial header, partial payload, or a bad
//! checksum on the very last record) is reported as a torn tail so the
//! caller can truncate it. A bad checksum anywhere else is corruption.

use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Read, Write};

use crate::account::Effect;
use crate::core_types::{SeqNum, UserId};
use crate::ledger::LedgerEntry;
use crate::store::record::Idempotency;

// ============================================================
// CONSTANTS
// ============================================================

/// Header size in bytes (24 bytes, naturally aligned)
pub const WAL_HEADER_SIZE: usize = 24;

/// Upper bound on a single payload; anything larger is treated as garbage
pub const WAL_MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

// ============================================================
// WAL HEADER (24 bytes)
// ============================================================

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub seq_id: u64,
    pub epoch: u32,
    pub checksum: u32,
    pub payload_len: u32,
    pub entry_type: u8,
    pub version: u8,
    pub reserved: u16,
}

impl WalHeader {
    /// Create a new header with CRC32 checksum calculated from payload
    pub fn new(entry_type: WalEntryType, epoch: u32, seq_id: u64, payload: &[u8]) -> Self {
        Self {
            seq_id,
            epoch,
            checksum: crc32_checksum(payload),
            payload_len: payload.len() as u32,
            entry_type: entry_type as u8,
            version: 0,
            reserved: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        buf[0..8].copy_from_slice(&{ self.seq_id }.to_le_bytes());
        buf[8..12].copy_from_slice(&{ self.epoch }.to_le_bytes());
        buf[12..16].copy_from_slice(&{ self.checksum }.to_le_bytes());
        buf[16..20].copy_from_slice(&{ self.payload_len }.to_le_bytes());
        buf[20] = self.entry_type;
        buf[21] = self.version;
        buf[22..24].copy_from_slice(&{ self.reserved }.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; WAL_HEADER_SIZE]) -> Self {
        Self {
            seq_id: u64::from_le_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
            epoch: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            checksum: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            payload_len: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            entry_type: buf[20],
            version: buf[21],
            reserved: u16::from_le_bytes([buf[22], buf[23]]),
        }
    }

    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        self.checksum == crc32_checksum(payload)
    }
}

// ============================================================
// ENTRY TYPES
// ============================================================

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalEntryType {
    AccountOpened = 1,
    Commit = 2,
    SnapshotMarker = 3,
}

impl TryFrom<u8> for WalEntryType {
    type Error = io::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::AccountOpened),
            2 => Ok(Self::Commit),
            3 => Ok(Self::SnapshotMarker),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown WalEntryType: {}", value),
            )),
        }
    }
}

// ============================================================
// PAYLOAD DEFINITIONS
// ============================================================

/// Account creation (entry_type = 1)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountOpenedPayload {
    pub user_id: UserId,
    pub referrer_id: Option<UserId>,
    pub at: DateTime<Utc>,
}

/// One committed unit for one account (entry_type = 2)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitPayload {
    pub user_id: UserId,
    /// Key and request fingerprint, so receipts survive a restart
    pub idempotency: Option<Idempotency>,
    pub effects: Vec<Effect>,
    pub entries: Vec<LedgerEntry>,
    pub at: DateTime<Utc>,
}

/// Snapshot marker (entry_type = 3)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotMarkerPayload {
    pub snapshot_dir: String,
    pub snapshot_seq: SeqNum,
    pub at: DateTime<Utc>,
}

// ============================================================
// CRC32 HELPER
// ============================================================

#[inline]
pub fn crc32_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// ============================================================
// WAL WRITER
// ============================================================

pub struct WalWriter<W: Write> {
    writer: W,
    epoch: u32,
    next_seq: SeqNum,
}

impl<W: Write> WalWriter<W> {
    pub fn new(writer: W, epoch: u32, start_seq: SeqNum) -> Self {
        Self {
            writer,
            epoch,
            next_seq: start_seq,
        }
    }

    /// Write an entry; returns its seq_id.
    ///
    /// The sequence number is only consumed when both header and payload
    /// were handed to the underlying writer.
    pub fn write_entry(&mut self, entry_type: WalEntryType, payload: &[u8]) -> io::Result<SeqNum> {
        if payload.len() > WAL_MAX_PAYLOAD as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds limit", payload.len()),
            ));
        }
        let seq_id = self.next_seq;
        let header = WalHeader::new(entry_type, self.epoch, seq_id, payload);
        self.writer.write_all(&header.to_bytes())?;
        self.writer.write_all(payload)?;
        self.next_seq += 1;
        Ok(seq_id)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn next_seq(&self) -> SeqNum {
        self.next_seq
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}

// ============================================================
// WAL READER
// ============================================================

/// A single journal entry (header + payload)
#[derive(Debug)]
pub struct WalEntry {
    pub header: WalHeader,
    pub payload: Vec<u8>,
}

/// Result of reading one record
#[derive(Debug)]
pub enum WalRead {
    Entry(WalEntry),
    /// Clean end of journal
    End,
    /// Incomplete final record; everything before `valid_len` is intact
    TornTail { valid_len: u64 },
}

pub struct WalReader<R: BufRead> {
    reader: R,
    offset: u64,
}

impl<R: BufRead> WalReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Byte offset just past the last complete record
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn read_entry(&mut self) -> io::Result<WalRead> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(WalRead::End);
        }

        let mut header_buf = [0u8; WAL_HEADER_SIZE];
        if !read_full(&mut self.reader, &mut header_buf)? {
            return Ok(self.torn());
        }
        let header = WalHeader::from_bytes(&header_buf);

        if header.payload_len > WAL_MAX_PAYLOAD {
            return self.bad_record(&header, "payload length out of range");
        }

        let mut payload = vec![0u8; header.payload_len as usize];
        if !read_full(&mut self.reader, &mut payload)? {
            return Ok(self.torn());
        }

        if !header.verify_checksum(&payload) {
            return self.bad_record(&header, "CRC32 checksum mismatch");
        }

        self.offset += (WAL_HEADER_SIZE + payload.len()) as u64;
        Ok(WalRead::Entry(WalEntry { header, payload }))
    }

    fn torn(&self) -> WalRead {
        WalRead::TornTail {
            valid_len: self.offset,
        }
    }

    /// A damaged last record is a torn write; a damaged record followed by
    /// more data is corruption.
    fn bad_record(&mut self, header: &WalHeader, reason: &str) -> io::Result<WalRead> {
        if self.reader.fill_buf()?.is_empty() {
            return Ok(self.torn());
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "{} at seq_id={}, offset={}",
                reason,
                { header.seq_id },
                self.offset
            ),
        ))
    }
}

/// `read_exact` that reports a short read instead of failing
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

// ============================================================
// TESTS
// ============================================================
