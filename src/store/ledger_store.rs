//! Ledger Store
//!
//! Durable home of every account record and the append-only entry log.
//!
//! # Commit protocol
//!
//! ```text
//! per-user gate (timeout) ─▶ idempotency check ─▶ mutation on a Draft
//!   ─▶ conservation, hold/withdrawal and replay checks ─▶ journal lock (timeout)
//!   ─▶ assign entry ids ─▶ append + fsync ─▶ install in memory
//! ```
//!
//! Records are only installed while the journal lock is held, so a snapshot
//! taken under that lock is a consistent cut at its sequence number.

use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::config::StoreConfig;
use super::draft::Draft;
use super::journal::{FileJournal, JournalSink, MemoryJournal, encode};
use super::record::{AccountRecord, Idempotency, Receipt};
use super::recovery::LedgerRecovery;
use super::snapshot::{LedgerImage, LedgerSnapshotter};
use crate::account::Account;
use crate::core_types::{EntryId, SeqNum, UserId};
use crate::error::LedgerError;
use crate::ledger::LedgerEntry;
use crate::wal::{AccountOpenedPayload, CommitPayload, SnapshotMarkerPayload, WalEntryType};

/// Journal writer plus the counters that advance with it
struct Journal {
    sink: Box<dyn JournalSink>,
    epoch: u32,
    next_entry_id: EntryId,
    commits_since_snapshot: u64,
    /// Set after a failed append or sync; the tail of the medium is unknown
    /// until the next recovery, so every later commit is refused.
    failed: Option<String>,
}

impl Journal {
    fn check(&self) -> Result<(), LedgerError> {
        match &self.failed {
            Some(reason) => Err(LedgerError::StoreUnavailable(format!(
                "journal failed earlier ({}); restart required",
                reason
            ))),
            None => Ok(()),
        }
    }

    fn write(
        &mut self,
        entry_type: WalEntryType,
        payload: &[u8],
        sync: bool,
    ) -> Result<SeqNum, LedgerError> {
        let result = self
            .sink
            .append(entry_type, payload)
            .and_then(|seq| if sync { self.sink.sync().map(|_| seq) } else { Ok(seq) });
        result.map_err(|e| {
            error!(error = %e, "Journal write failed");
            self.failed = Some(e.to_string());
            LedgerError::StoreUnavailable(format!("journal write failed: {}", e))
        })
    }
}

/// Summary counters for operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub accounts: usize,
    pub entries: usize,
    pub next_seq: SeqNum,
    pub next_entry_id: EntryId,
}

pub struct LedgerStore {
    config: StoreConfig,
    gates: DashMap<UserId, Arc<Mutex<()>>>,
    records: DashMap<UserId, AccountRecord>,
    journal: Mutex<Journal>,
    snapshotter: Option<LedgerSnapshotter>,
}

impl LedgerStore {
    /// Recover from `config.data_dir` and open the journal for appending
    pub fn open(config: StoreConfig) -> Result<Self, LedgerError> {
        let state = LedgerRecovery::new(&config).recover()?;
        let sink = FileJournal::open(config.wal_file(), state.epoch, state.next_seq)?;
        info!(
            data_dir = %config.data_dir.display(),
            accounts = state.records.len(),
            next_seq = state.next_seq,
            epoch = state.epoch,
            truncated_bytes = state.truncated_bytes,
            "Ledger store opened"
        );

        let snapshotter = LedgerSnapshotter::new(config.snapshot_dir());
        let store = Self::assemble(config, Box::new(sink), state.epoch, state.next_entry_id, Some(snapshotter));
        for (user_id, record) in state.records {
            store.gates.insert(user_id, Arc::new(Mutex::new(())));
            store.records.insert(user_id, record);
        }
        Ok(store)
    }

    /// Store backed by an in-memory journal (no snapshots)
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::with_journal(config, Box::new(MemoryJournal::new()))
    }

    /// Store over an arbitrary empty journal sink (no snapshots)
    pub fn with_journal(config: StoreConfig, sink: Box<dyn JournalSink>) -> Self {
        Self::assemble(config, sink, 1, 1, None)
    }

    fn assemble(
        config: StoreConfig,
        sink: Box<dyn JournalSink>,
        epoch: u32,
        next_entry_id: EntryId,
        snapshotter: Option<LedgerSnapshotter>,
    ) -> Self {
        Self {
            config,
            gates: DashMap::new(),
            records: DashMap::new(),
            journal: Mutex::new(Journal {
                sink,
                epoch,
                next_entry_id,
                commits_since_snapshot: 0,
                failed: None,
            }),
            snapshotter,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ============================================================
    // READS
    // ============================================================

    pub fn get(&self, user_id: UserId) -> Result<Account, LedgerError> {
        self.records
            .get(&user_id)
            .map(|r| r.account.clone())
            .ok_or(LedgerError::NotFound(user_id))
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.records.contains_key(&user_id)
    }

    /// All accounts, ordered by user id
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.records.iter().map(|r| r.account.clone()).collect();
        accounts.sort_by_key(|a| a.user_id());
        accounts
    }

    /// Entries of one account in commit order
    pub fn entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.records
            .get(&user_id)
            .map(|r| r.entries.clone())
            .ok_or(LedgerError::NotFound(user_id))
    }

    /// Every entry in the store, ordered by entry id
    pub fn all_entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .records
            .iter()
            .flat_map(|r| r.entries.clone())
            .collect();
        entries.sort_by_key(|e| e.entry_id);
        entries
    }

    /// Previously committed receipt for an idempotency key
    pub fn receipt(&self, user_id: UserId, idempotency_key: &str) -> Option<Receipt> {
        self.records
            .get(&user_id)
            .and_then(|r| r.receipt(idempotency_key))
    }

    pub async fn stats(&self) -> StoreStats {
        let journal = self.journal.lock().await;
        StoreStats {
            accounts: self.records.len(),
            entries: self.records.iter().map(|r| r.entries.len()).sum(),
            next_seq: journal.sink.next_seq(),
            next_entry_id: journal.next_entry_id,
        }
    }

    // ============================================================
    // WRITES
    // ============================================================

    /// Open an account unless it exists. A late referrer is ignored.
    ///
    /// Returns the account and whether this call created it.
    pub async fn create_if_absent(
        &self,
        user_id: UserId,
        referrer_id: Option<UserId>,
    ) -> Result<(Account, bool), LedgerError> {
        if let Some(record) = self.records.get(&user_id) {
            return Ok((record.account.clone(), false));
        }

        let mut journal = self.lock_journal().await?;
        if let Some(record) = self.records.get(&user_id) {
            return Ok((record.account.clone(), false));
        }
        journal.check()?;

        let at = Utc::now();
        let payload = encode(&AccountOpenedPayload {
            user_id,
            referrer_id,
            at,
        })?;
        let seq_id = journal.write(WalEntryType::AccountOpened, &payload, self.config.sync_on_commit)?;

        let account = Account::new(user_id, referrer_id, at);
        self.gates.insert(user_id, Arc::new(Mutex::new(())));
        self.records
            .insert(user_id, AccountRecord::new(account.clone()));
        debug!(user_id, ?referrer_id, seq_id, "Account opened");

        self.after_commit(&mut journal);
        Ok((account, true))
    }

    /// Run `mutation` against a draft of the account and commit the result
    /// atomically.
    ///
    /// The draft sees the account's committed entries, so a mutation can
    /// link to them without a second lookup. With an idempotency key, a
    /// retry of the same request returns the first receipt flagged
    /// `replayed` without running `mutation`; the same key on a different
    /// request is a `Conflict`. A mutation that records nothing commits
    /// nothing.
    pub async fn apply<F>(
        &self,
        user_id: UserId,
        idempotency: Option<&Idempotency>,
        mutation: F,
    ) -> Result<Receipt, LedgerError>
    where
        F: FnOnce(&mut Draft<'_>) -> Result<(), LedgerError>,
    {
        let gate = self
            .gates
            .get(&user_id)
            .map(|g| Arc::clone(g.value()))
            .ok_or(LedgerError::NotFound(user_id))?;
        let _section = tokio::time::timeout(self.config.lock_timeout(), gate.lock())
            .await
            .map_err(|_| {
                warn!(user_id, "Timed out waiting for account section");
                LedgerError::StoreUnavailable(format!("account {} is busy", user_id))
            })?;

        // The record is only read here; writers for this user wait on the gate
        let (base, mut drafted, effects, draft_entries) = {
            let record = self
                .records
                .get(&user_id)
                .ok_or(LedgerError::NotFound(user_id))?;
            if let Some(idempotency) = idempotency
                && let Some(receipt) = record.replay_for(idempotency)?
            {
                debug!(user_id, key = %idempotency.key, "Idempotent replay");
                return Ok(receipt);
            }

            let base = record.account.clone();
            let mut draft = Draft::new(base.clone(), &record.entries);
            mutation(&mut draft)?;

            if draft.is_empty() {
                return Ok(Receipt {
                    user_id,
                    entries: Vec::new(),
                    balances: *base.pools(),
                    replayed: false,
                });
            }
            let (drafted, effects, draft_entries) = draft.into_parts();
            (base, drafted, effects, draft_entries)
        };

        let at = Utc::now();
        drafted.apply_all(&[], at)?;

        // Conservation: the pool total moves by exactly the entries' effect
        let expected = base.pools().total() as i128
            + draft_entries.iter().map(|e| e.net_effect()).sum::<i128>();
        if drafted.pools().total() as i128 != expected {
            return Err(LedgerError::Conflict(format!(
                "conservation check failed for user {}: total {} != expected {}",
                user_id,
                drafted.pools().total(),
                expected
            )));
        }
        if drafted.open_hold_total() != drafted.pools().held() as u128 {
            return Err(LedgerError::Conflict(format!(
                "held {} does not match open holds {} for user {}",
                drafted.pools().held(),
                drafted.open_hold_total(),
                user_id
            )));
        }
        if drafted.open_withdrawal_total() != drafted.pools().withdrawal_processing() as u128 {
            return Err(LedgerError::Conflict(format!(
                "withdrawal_processing {} does not match open requests {} for user {}",
                drafted.pools().withdrawal_processing(),
                drafted.open_withdrawal_total(),
                user_id
            )));
        }

        // The journal record must rebuild exactly this state on replay
        let mut replayed = base.clone();
        replayed.apply_all(&effects, at)?;
        if replayed != drafted {
            return Err(LedgerError::Conflict(format!(
                "draft for user {} diverges from its recorded effects",
                user_id
            )));
        }

        let mut journal = self.lock_journal().await?;
        journal.check()?;

        let live_version = self
            .records
            .get(&user_id)
            .map(|r| r.account.version())
            .ok_or(LedgerError::NotFound(user_id))?;
        if live_version != base.version() {
            return Err(LedgerError::Conflict(format!(
                "account {} moved from version {} to {}",
                user_id,
                base.version(),
                live_version
            )));
        }

        let first_id = journal.next_entry_id;
        let entries: Vec<LedgerEntry> = draft_entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| e.finalize(first_id + i as EntryId, user_id, at))
            .collect();

        let payload = encode(&CommitPayload {
            user_id,
            idempotency: idempotency.cloned(),
            effects,
            entries: entries.clone(),
            at,
        })?;
        let seq_id = journal.write(WalEntryType::Commit, &payload, self.config.sync_on_commit)?;
        journal.next_entry_id = first_id + entries.len() as EntryId;

        let receipt = {
            let mut record = self
                .records
                .get_mut(&user_id)
                .ok_or(LedgerError::NotFound(user_id))?;
            record.install(replayed, entries, idempotency.cloned())
        };
        debug!(
            user_id,
            seq_id,
            entries = receipt.entries.len(),
            "Committed"
        );

        self.after_commit(&mut journal);
        Ok(receipt)
    }

    // ============================================================
    // SNAPSHOTS
    // ============================================================

    /// Write a snapshot now and prune old ones
    pub async fn snapshot(&self) -> Result<PathBuf, LedgerError> {
        let mut journal = self.lock_journal().await?;
        self.snapshot_locked(&mut journal)
    }

    fn snapshot_locked(&self, journal: &mut Journal) -> Result<PathBuf, LedgerError> {
        let snapshotter = self.snapshotter.as_ref().ok_or_else(|| {
            LedgerError::StoreUnavailable("snapshots are disabled for this store".into())
        })?;
        journal.check()?;

        let seq = journal.sink.next_seq() - 1;
        let mut records: Vec<AccountRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.account.user_id());
        let image = LedgerImage {
            next_entry_id: journal.next_entry_id,
            records,
        };

        let path = snapshotter.create_snapshot(&image, seq, journal.epoch)?;
        let marker = encode(&SnapshotMarkerPayload {
            snapshot_dir: path.display().to_string(),
            snapshot_seq: seq,
            at: Utc::now(),
        })?;
        journal.write(WalEntryType::SnapshotMarker, &marker, self.config.sync_on_commit)?;
        journal.commits_since_snapshot = 0;

        let removed = snapshotter.prune(self.config.snapshot_keep_count)?;
        info!(
            seq,
            accounts = image.records.len(),
            pruned = removed,
            path = %path.display(),
            "Snapshot written"
        );
        Ok(path)
    }

    fn after_commit(&self, journal: &mut Journal) {
        journal.commits_since_snapshot += 1;
        let threshold = self.config.snapshot_event_threshold;
        if self.snapshotter.is_some() && threshold > 0 && journal.commits_since_snapshot >= threshold {
            // The commit is already durable; a failed snapshot only delays the next one
            if let Err(e) = self.snapshot_locked(journal) {
                warn!(error = %e, "Automatic snapshot failed");
            }
        }
    }

    async fn lock_journal(&self) -> Result<MutexGuard<'_, Journal>, LedgerError> {
        tokio::time::timeout(self.config.lock_timeout(), self.journal.lock())
            .await
            .map_err(|_| LedgerError::StoreUnavailable("journal is busy".into()))
    }
}

// ============================================================
// Unit Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Effect;
    use crate::balance::Pool;
    use crate::ledger::{DraftEntry, EntryKind, Operation, PoolChange};
    use crate::store::record::RequestFingerprint;
    use std::io;
    use std::time::Duration;

    fn config() -> StoreConfig {
        let mut config = StoreConfig::new("unused");
        config.lock_timeout_ms = 100;
        config
    }

    /// Credit spendable with a matching entry
    fn credit(draft: &mut Draft<'_>, amount: u64) -> Result<(), LedgerError> {
        let before = draft.account().balance(Pool::Spendable);
        draft.record(Effect::Credit {
            pool: Pool::Spendable,
            amount,
        })?;
        draft.push_entry(DraftEntry {
            kind: EntryKind::Credit,
            operation: Operation::Primitive,
            amount,
            changes: vec![PoolChange {
                pool: Pool::Spendable,
                before,
                after: before + amount,
            }],
            related_entry_id: None,
            item_id: None,
            counterparty: None,
        });
        Ok(())
    }

    fn key(key: &str, amount: u64) -> Idempotency {
        Idempotency::new(
            key,
            RequestFingerprint::new(Operation::Primitive)
                .amount(amount)
                .pool(Pool::Spendable),
        )
    }

    struct FailingJournal;

    impl JournalSink for FailingJournal {
        fn append(&mut self, _: WalEntryType, _: &[u8]) -> io::Result<SeqNum> {
            Err(io::Error::other("disk full"))
        }
        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
        fn next_seq(&self) -> SeqNum {
            1
        }
    }

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let store = LedgerStore::in_memory(config());
        let (account, created) = store.create_if_absent(1, Some(9)).await.unwrap();
        assert!(created);
        assert_eq!(account.referrer_id(), Some(9));

        // Late referrer ignored
        let (account, created) = store.create_if_absent(1, Some(10)).await.unwrap();
        assert!(!created);
        assert_eq!(account.referrer_id(), Some(9));
    }

    #[tokio::test]
    async fn test_apply_unknown_account() {
        let store = LedgerStore::in_memory(config());
        let result = store.apply(42, None, |d| credit(d, 1)).await;
        assert_eq!(result.unwrap_err(), LedgerError::NotFound(42));
    }

    #[tokio::test]
    async fn test_apply_assigns_monotonic_entry_ids() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();
        store.create_if_absent(2, None).await.unwrap();

        let r1 = store.apply(1, None, |d| credit(d, 10)).await.unwrap();
        let r2 = store
            .apply(2, None, |d| {
                credit(d, 5)?;
                credit(d, 6)
            })
            .await
            .unwrap();
        assert_eq!(r1.entry_ids(), vec![1]);
        assert_eq!(r2.entry_ids(), vec![2, 3]);
        assert_eq!(r2.balances.spendable(), 11);

        let all: Vec<EntryId> = store.all_entries().iter().map(|e| e.entry_id).collect();
        assert_eq!(all, vec![1, 2, 3]);
        assert_eq!(store.get(2).unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_replay() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();

        let topup = key("topup-1", 10);
        let first = store.apply(1, Some(&topup), |d| credit(d, 10)).await.unwrap();
        let second = store.apply(1, Some(&topup), |d| credit(d, 10)).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.entries, second.entries);
        assert_eq!(store.get(1).unwrap().balance(Pool::Spendable), 10);
        assert_eq!(store.entries(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_key_reused_for_other_request_is_conflict() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();
        store.apply(1, Some(&key("k", 10)), |d| credit(d, 10)).await.unwrap();

        let result = store.apply(1, Some(&key("k", 25)), |d| credit(d, 25)).await;
        assert!(matches!(result, Err(LedgerError::Conflict(_))));
        assert_eq!(store.get(1).unwrap().balance(Pool::Spendable), 10);
        assert_eq!(store.entries(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_no_trace() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();

        let result = store
            .apply(1, Some(&key("k", 10)), |d| {
                credit(d, 10)?;
                Err(LedgerError::InvalidAmount)
            })
            .await;
        assert_eq!(result.unwrap_err(), LedgerError::InvalidAmount);
        assert_eq!(store.get(1).unwrap().pools().total(), 0);
        assert!(store.entries(1).unwrap().is_empty());
        assert!(store.receipt(1, "k").is_none());
    }

    #[tokio::test]
    async fn test_unrecorded_effect_is_conflict() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();

        // Credit without a ledger entry breaks conservation
        let result = store
            .apply(1, None, |d| {
                d.record(Effect::Credit {
                    pool: Pool::Spendable,
                    amount: 10,
                })
            })
            .await;
        assert!(matches!(result, Err(LedgerError::Conflict(_))));
        assert_eq!(store.get(1).unwrap().balance(Pool::Spendable), 0);
    }

    #[tokio::test]
    async fn test_held_without_hold_is_conflict() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();

        let result = store
            .apply(1, None, |d| {
                d.record(Effect::Credit {
                    pool: Pool::Held,
                    amount: 10,
                })?;
                d.push_entry(DraftEntry {
                    kind: EntryKind::Credit,
                    operation: Operation::Primitive,
                    amount: 10,
                    changes: vec![PoolChange {
                        pool: Pool::Held,
                        before: 0,
                        after: 10,
                    }],
                    related_entry_id: None,
                    item_id: None,
                    counterparty: None,
                });
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(LedgerError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_processing_without_request_is_conflict() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();
        store.apply(1, None, |d| credit(d, 50)).await.unwrap();

        // Funds parked in withdrawal_processing with no open request
        let result = store
            .apply(1, None, |d| {
                d.record(Effect::Move {
                    from: Pool::Spendable,
                    to: Pool::WithdrawalProcessing,
                    amount: 20,
                })?;
                d.push_entry(DraftEntry {
                    kind: EntryKind::Move,
                    operation: Operation::Primitive,
                    amount: 20,
                    changes: vec![
                        PoolChange {
                            pool: Pool::Spendable,
                            before: 50,
                            after: 30,
                        },
                        PoolChange {
                            pool: Pool::WithdrawalProcessing,
                            before: 0,
                            after: 20,
                        },
                    ],
                    related_entry_id: None,
                    item_id: None,
                    counterparty: None,
                });
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(LedgerError::Conflict(_))));
        assert_eq!(store.get(1).unwrap().balance(Pool::WithdrawalProcessing), 0);
    }

    #[tokio::test]
    async fn test_draft_sees_committed_history() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();
        store.apply(1, None, |d| credit(d, 10)).await.unwrap();

        let mut seen = Vec::new();
        store
            .apply(1, None, |d| {
                seen = d.history().iter().map(|e| e.entry_id).collect();
                credit(d, 1)
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![1]);
    }

    #[tokio::test]
    async fn test_journal_failure_is_store_unavailable() {
        let store = LedgerStore::with_journal(config(), Box::new(FailingJournal));
        let result = store.create_if_absent(1, None).await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
        assert!(!store.contains(1));

        // Later commits are refused as well
        let result = store.create_if_absent(2, None).await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_busy_section_times_out() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();

        let gate = Arc::clone(store.gates.get(&1).unwrap().value());
        let _held = gate.lock().await;

        let started = std::time::Instant::now();
        let result = store.apply(1, Some(&key("k", 1)), |d| credit(d, 1)).await;
        assert!(matches!(result, Err(LedgerError::StoreUnavailable(_))));
        assert!(result.unwrap_err().is_retryable());
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(store.receipt(1, "k").is_none());
    }

    #[tokio::test]
    async fn test_empty_mutation_commits_nothing() {
        let store = LedgerStore::in_memory(config());
        store.create_if_absent(1, None).await.unwrap();
        let before = store.stats().await;

        let receipt = store.apply(1, Some(&key("noop", 0)), |_| Ok(())).await.unwrap();
        assert!(receipt.entries.is_empty());
        assert_eq!(store.stats().await, before);
        assert_eq!(store.get(1).unwrap().version(), 0);
    }

    #[tokio::test]
    async fn test_reopen_restores_state() {
        let temp_dir = format!("target/test_ledger_store_reopen_{}", std::process::id());
        let _ = std::fs::remove_dir_all(&temp_dir);
        let mut cfg = StoreConfig::new(&temp_dir);
        cfg.snapshot_event_threshold = 3;

        {
            let store = LedgerStore::open(cfg.clone()).unwrap();
            store.create_if_absent(1, None).await.unwrap();
            for i in 0..4 {
                let credit_key = key(&format!("credit-{}", i), 10);
                store.apply(1, Some(&credit_key), |d| credit(d, 10)).await.unwrap();
            }
        }

        let store = LedgerStore::open(cfg.clone()).unwrap();
        assert_eq!(store.get(1).unwrap().balance(Pool::Spendable), 40);
        assert_eq!(store.entries(1).unwrap().len(), 4);
        assert!(store.receipt(1, "credit-0").is_some());
        assert!(PathBuf::from(&temp_dir).join("snapshots/latest/COMPLETE").exists());

        // Entry ids continue after recovery
        let receipt = store.apply(1, None, |d| credit(d, 1)).await.unwrap();
        assert_eq!(receipt.entry_ids(), vec![5]);

        let _ = std::fs::remove_dir_all(&temp_dir);
    }
}
