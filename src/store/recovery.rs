//! Ledger Recovery Logic
//!
//! Handles cold/hot start recovery from Snapshot + Journal

use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::Path;

use super::config::StoreConfig;
use super::record::AccountRecord;
use super::snapshot::LedgerSnapshotter;
use crate::account::Account;
use crate::core_types::{EntryId, SeqNum, UserId};
use crate::error::LedgerError;
use crate::wal::{AccountOpenedPayload, CommitPayload, WalEntry, WalEntryType, WalRead, WalReader};

// ============================================================
// Recovery State
// ============================================================

pub struct RecoveryState {
    pub records: FxHashMap<UserId, AccountRecord>,
    pub next_entry_id: EntryId,
    pub next_seq: SeqNum,
    /// Epoch for the writer of this process lifetime
    pub epoch: u32,
    /// Journal records re-applied on top of the snapshot
    pub replayed: u64,
    /// Bytes cut from a torn journal tail
    pub truncated_bytes: u64,
}

// ============================================================
// Ledger Recovery
// ============================================================

pub struct LedgerRecovery<'a> {
    config: &'a StoreConfig,
}

impl<'a> LedgerRecovery<'a> {
    pub fn new(config: &'a StoreConfig) -> Self {
        Self { config }
    }

    /// Recover ledger state from Snapshot + Journal
    ///
    /// Recovery flow:
    /// 1. Load the latest complete snapshot, or start empty (snapshot_seq = 0)
    /// 2. Replay journal records with seq_id > snapshot_seq
    /// 3. Truncate a torn final record
    /// 4. Return the rebuilt state
    pub fn recover(&self) -> Result<RecoveryState, LedgerError> {
        let snapshotter = LedgerSnapshotter::new(self.config.snapshot_dir());

        // Step 1: snapshot or cold start
        let (mut state, snapshot_seq) = match snapshotter
            .load_latest_snapshot()
            .map_err(|e| LedgerError::Corrupted(format!("snapshot: {}", e)))?
        {
            Some((metadata, image)) => {
                tracing::info!(
                    seq_id = metadata.wal_seq_id,
                    user_count = metadata.user_count,
                    entry_count = metadata.entry_count,
                    "Loaded snapshot"
                );
                let records = image
                    .records
                    .into_iter()
                    .map(|r| (r.account.user_id(), r))
                    .collect();
                (
                    RecoveryState {
                        records,
                        next_entry_id: image.next_entry_id,
                        next_seq: metadata.wal_seq_id + 1,
                        epoch: metadata.wal_epoch,
                        replayed: 0,
                        truncated_bytes: 0,
                    },
                    metadata.wal_seq_id,
                )
            }
            None => {
                tracing::info!("No snapshot found, cold start");
                (
                    RecoveryState {
                        records: FxHashMap::default(),
                        next_entry_id: 1,
                        next_seq: 1,
                        epoch: 0,
                        replayed: 0,
                        truncated_bytes: 0,
                    },
                    0,
                )
            }
        };

        // Step 2-3: journal replay
        let wal_file = self.config.wal_file();
        if wal_file.exists() {
            self.replay_journal(&wal_file, snapshot_seq, &mut state)?;
            tracing::info!(
                from_seq = snapshot_seq + 1,
                to_seq = state.next_seq - 1,
                replayed = state.replayed,
                "Replayed journal"
            );
        } else {
            tracing::info!("No journal file found");
        }

        state.epoch += 1;
        Ok(state)
    }

    fn replay_journal(
        &self,
        path: &Path,
        snapshot_seq: SeqNum,
        state: &mut RecoveryState,
    ) -> Result<(), LedgerError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = WalReader::new(BufReader::new(file));

        loop {
            let read = reader
                .read_entry()
                .map_err(|e| LedgerError::Corrupted(format!("journal: {}", e)))?;
            match read {
                WalRead::Entry(entry) => {
                    state.epoch = state.epoch.max(entry.header.epoch);
                    let seq_id = entry.header.seq_id;
                    if seq_id <= snapshot_seq {
                        continue;
                    }
                    if seq_id != state.next_seq {
                        return Err(LedgerError::Corrupted(format!(
                            "journal gap: expected seq_id {}, found {}",
                            state.next_seq, seq_id
                        )));
                    }
                    apply_entry(&entry, state)?;
                    state.next_seq = seq_id + 1;
                    state.replayed += 1;
                }
                WalRead::End => break,
                WalRead::TornTail { valid_len } => {
                    tracing::warn!(
                        valid_len,
                        file_len,
                        path = %path.display(),
                        "Torn journal tail, truncating"
                    );
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(valid_len)?;
                    file.sync_all()?;
                    state.truncated_bytes = file_len - valid_len;
                    break;
                }
            }
        }
        Ok(())
    }
}

fn apply_entry(entry: &WalEntry, state: &mut RecoveryState) -> Result<(), LedgerError> {
    let entry_type = WalEntryType::try_from(entry.header.entry_type)
        .map_err(|e| LedgerError::Corrupted(e.to_string()))?;

    match entry_type {
        WalEntryType::AccountOpened => {
            let payload: AccountOpenedPayload = decode(entry)?;
            state
                .records
                .entry(payload.user_id)
                .or_insert_with(|| {
                    AccountRecord::new(Account::new(
                        payload.user_id,
                        payload.referrer_id,
                        payload.at,
                    ))
                });
        }
        WalEntryType::Commit => {
            let payload: CommitPayload = decode(entry)?;
            let record = state.records.get_mut(&payload.user_id).ok_or_else(|| {
                LedgerError::Corrupted(format!(
                    "commit for unknown account {} at seq_id {}",
                    payload.user_id,
                    { entry.header.seq_id }
                ))
            })?;
            if let Some(last) = payload.entries.last() {
                state.next_entry_id = state.next_entry_id.max(last.entry_id + 1);
            }
            record.replay(
                &payload.effects,
                payload.entries,
                payload.idempotency,
                payload.at,
            )?;
        }
        WalEntryType::SnapshotMarker => {}
    }
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(entry: &WalEntry) -> Result<T, LedgerError> {
    bincode::deserialize(&entry.payload).map_err(|e| {
        LedgerError::Corrupted(format!(
            "undecodable payload at seq_id {}: {}",
            { entry.header.seq_id },
            e
        ))
    })
}

// ============================================================
// Unit Tests
// ============================================================
