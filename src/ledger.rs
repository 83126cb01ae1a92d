//! Ledger - Audit trail of pool-affecting operations
//!
//! Records every balance change for complete auditability. Entries are
//! created as [`DraftEntry`] inside a unit of work and receive their
//! `entry_id` and timestamp when the store commits them; after that they are
//! never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};

use crate::balance::Pool;
use crate::core_types::{Amount, EntryId, ItemId, UserId};

/// Primitive that produced the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Credit,
    Debit,
    Move,
    /// No pool change (e.g. referral link without bonus)
    Memo,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "credit",
            EntryKind::Debit => "debit",
            EntryKind::Move => "move",
            EntryKind::Memo => "memo",
        }
    }
}

/// Business operation an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Raw engine primitive with no business label
    Primitive,
    /// Sale proceeds credited to `held`
    SaleHold,
    /// Sale verified: `held -> spendable`
    SaleSettled,
    /// Sale rejected: hold amount leaves the ledger
    SaleVoided,
    /// Purchase paid directly from a pool
    Purchase,
    /// Purchase funds reserved: `spendable -> held`
    PurchaseReserved,
    /// Reserved purchase completed: hold amount paid out
    PurchaseSettled,
    /// Reserved purchase cancelled: `held -> spendable`
    PurchaseCancelled,
    Topup,
    WithdrawalRequested,
    /// Terminal payout: funds leave the ledger
    WithdrawalPaid,
    /// Payout failed: `withdrawal_processing -> spendable`
    WithdrawalReturned,
    ReferralCommission,
    ReferralLinked,
    ReferralBonus,
    AdminCredit,
    AdminDebit,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Primitive => "primitive",
            Operation::SaleHold => "sale_hold",
            Operation::SaleSettled => "sale_settled",
            Operation::SaleVoided => "sale_voided",
            Operation::Purchase => "purchase",
            Operation::PurchaseReserved => "purchase_reserved",
            Operation::PurchaseSettled => "purchase_settled",
            Operation::PurchaseCancelled => "purchase_cancelled",
            Operation::Topup => "topup",
            Operation::WithdrawalRequested => "withdrawal_requested",
            Operation::WithdrawalPaid => "withdrawal_paid",
            Operation::WithdrawalReturned => "withdrawal_returned",
            Operation::ReferralCommission => "referral_commission",
            Operation::ReferralLinked => "referral_linked",
            Operation::ReferralBonus => "referral_bonus",
            Operation::AdminCredit => "admin_credit",
            Operation::AdminDebit => "admin_debit",
        }
    }

    /// Settlements of a referred user that earn the referrer a commission
    #[inline]
    pub fn is_referral_settlement(&self) -> bool {
        matches!(
            self,
            Operation::SaleSettled | Operation::Purchase | Operation::PurchaseSettled
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Before/after snapshot of one affected pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolChange {
    pub pool: Pool,
    pub before: Amount,
    pub after: Amount,
}

/// Entry built inside a unit of work, not yet committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftEntry {
    pub kind: EntryKind,
    pub operation: Operation,
    pub amount: Amount,
    pub changes: Vec<PoolChange>,
    pub related_entry_id: Option<EntryId>,
    pub item_id: Option<ItemId>,
    pub counterparty: Option<UserId>,
}

impl DraftEntry {
    /// Signed effect on the account total (moves and memos are zero)
    pub fn net_effect(&self) -> i128 {
        self.changes
            .iter()
            .map(|c| c.after as i128 - c.before as i128)
            .sum()
    }

    pub fn finalize(self, entry_id: EntryId, user_id: UserId, timestamp: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            entry_id,
            user_id,
            kind: self.kind,
            operation: self.operation,
            amount: self.amount,
            changes: self.changes,
            timestamp,
            related_entry_id: self.related_entry_id,
            item_id: self.item_id,
            counterparty: self.counterparty,
        }
    }
}

/// Immutable audit record of one committed pool-affecting operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub kind: EntryKind,
    pub operation: Operation,
    pub amount: Amount,
    pub changes: Vec<PoolChange>,
    pub timestamp: DateTime<Utc>,
    pub related_entry_id: Option<EntryId>,
    pub item_id: Option<ItemId>,
    pub counterparty: Option<UserId>,
}

impl LedgerEntry {
    pub fn net_effect(&self) -> i128 {
        self.changes
            .iter()
            .map(|c| c.after as i128 - c.before as i128)
            .sum()
    }

    /// Balance of `pool` right after this entry, if the entry touched it
    pub fn after(&self, pool: Pool) -> Option<Amount> {
        self.changes.iter().find(|c| c.pool == pool).map(|c| c.after)
    }
}

/// Writes ledger entries to CSV (audit export)
pub struct LedgerCsvWriter<W: Write> {
    out: W,
    entry_count: u64,
}

impl<W: Write> LedgerCsvWriter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(
            out,
            "entry_id,user_id,kind,operation,amount,pool,before,after,related_entry_id,item_id,counterparty,timestamp"
        )?;
        Ok(Self {
            out,
            entry_count: 0,
        })
    }

    /// One CSV row per affected pool (memo entries get a single row)
    pub fn write_entry(&mut self, entry: &LedgerEntry) -> io::Result<()> {
        let related = entry
            .related_entry_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        let counterparty = entry
            .counterparty
            .map(|id| id.to_string())
            .unwrap_or_default();
        let item = entry.item_id.as_deref().unwrap_or("");

        if entry.changes.is_empty() {
            writeln!(
                self.out,
                "{},{},{},{},{},,,,{},{},{},{}",
                entry.entry_id,
                entry.user_id,
                entry.kind.as_str(),
                entry.operation,
                entry.amount,
                related,
                item,
                counterparty,
                entry.timestamp.to_rfc3339()
            )?;
        }
        for change in &entry.changes {
            writeln!(
                self.out,
                "{},{},{},{},{},{},{},{},{},{},{},{}",
                entry.entry_id,
                entry.user_id,
                entry.kind.as_str(),
                entry.operation,
                entry.amount,
                change.pool,
                change.before,
                change.after,
                related,
                item,
                counterparty,
                entry.timestamp.to_rfc3339()
            )?;
        }
        self.entry_count += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Get total number of entries written
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }
}
