//! Per-account state held by the store

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::account::{Account, Effect};
use crate::balance::{Pool, Pools};
use crate::core_types::{Amount, EntryId, ItemId, UserId};
use crate::error::LedgerError;
use crate::ledger::{LedgerEntry, Operation};

/// What a keyed request asked for. A retry must ask for the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub operation: Operation,
    pub amount: Option<Amount>,
    pub pool: Option<Pool>,
    pub item_id: Option<ItemId>,
    /// Anything else that tells two requests apart (payout method, primitive)
    pub detail: Option<String>,
}

impl RequestFingerprint {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            amount: None,
            pool: None,
            item_id: None,
            detail: None,
        }
    }

    pub fn amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn pool(mut self, pool: Pool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn item(mut self, item_id: &str) -> Self {
        self.item_id = Some(item_id.to_string());
        self
    }

    pub fn detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// Caller-supplied idempotency key bound to the request it names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idempotency {
    pub key: String,
    pub fingerprint: RequestFingerprint,
}

impl Idempotency {
    pub fn new(key: impl Into<String>, fingerprint: RequestFingerprint) -> Self {
        Self {
            key: key.into(),
            fingerprint,
        }
    }
}

/// Result of a committed (or replayed) unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub user_id: UserId,
    /// Entries written by the unit, in commit order
    pub entries: Vec<LedgerEntry>,
    /// Pool balances right after the unit
    pub balances: Pools,
    /// `true` when an earlier commit with the same idempotency key answered
    pub replayed: bool,
}

impl Receipt {
    /// Last entry written, if any
    pub fn last_entry(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn entry_ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|e| e.entry_id).collect()
    }
}

/// Receipt kept under an idempotency key, with the request that earned it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReceipt {
    pub fingerprint: RequestFingerprint,
    pub receipt: Receipt,
}

/// Account plus its ledger entries and idempotency receipts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account: Account,
    pub entries: Vec<LedgerEntry>,
    pub receipts: FxHashMap<String, StoredReceipt>,
}

impl AccountRecord {
    pub fn new(account: Account) -> Self {
        Self {
            account,
            entries: Vec::new(),
            receipts: FxHashMap::default(),
        }
    }

    /// Install a committed unit whose effects were already applied to
    /// `account`.
    pub fn install(
        &mut self,
        account: Account,
        entries: Vec<LedgerEntry>,
        idempotency: Option<Idempotency>,
    ) -> Receipt {
        let receipt = Receipt {
            user_id: account.user_id(),
            entries: entries.clone(),
            balances: *account.pools(),
            replayed: false,
        };
        self.account = account;
        self.entries.extend(entries);
        if let Some(Idempotency { key, fingerprint }) = idempotency {
            self.receipts.insert(
                key,
                StoredReceipt {
                    fingerprint,
                    receipt: receipt.clone(),
                },
            );
        }
        receipt
    }

    /// Re-apply a journaled unit (recovery path)
    pub fn replay(
        &mut self,
        effects: &[Effect],
        entries: Vec<LedgerEntry>,
        idempotency: Option<Idempotency>,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let mut account = self.account.clone();
        account.apply_all(effects, at).map_err(|e| {
            LedgerError::Corrupted(format!(
                "journal replay failed for user {}: {}",
                account.user_id(),
                e
            ))
        })?;
        self.install(account, entries, idempotency);
        Ok(())
    }

    /// Stored receipt for a key, flagged as replayed
    pub fn receipt(&self, idempotency_key: &str) -> Option<Receipt> {
        self.receipts.get(idempotency_key).map(|r| Receipt {
            replayed: true,
            ..r.receipt.clone()
        })
    }

    /// Receipt answering a retried request.
    ///
    /// A key already spent on a different request is a `Conflict`: the
    /// caller reused a key and nothing of the new request was applied.
    pub fn replay_for(&self, idempotency: &Idempotency) -> Result<Option<Receipt>, LedgerError> {
        let Some(stored) = self.receipts.get(&idempotency.key) else {
            return Ok(None);
        };
        if stored.fingerprint != idempotency.fingerprint {
            return Err(LedgerError::Conflict(format!(
                "idempotency key {} on account {} was used for {:?}, now {:?}",
                idempotency.key,
                self.account.user_id(),
                stored.fingerprint,
                idempotency.fingerprint
            )));
        }
        Ok(Some(Receipt {
            replayed: true,
            ..stored.receipt.clone()
        }))
    }
}
