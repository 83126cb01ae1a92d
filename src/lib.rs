//! BGT Ledger - Balance Ledger & Escrow Engine
//!
//! Per-user multi-pool balances for a marketplace bot, with escrow holds,
//! referral commissions and an append-only audit log, persisted through a
//! write-ahead journal and snapshots.
//!
//! # Modules
//!
//! - [`core_types`] - Core type aliases (UserId, Amount, EntryId)
//! - [`money`] - Micro-USDT conversion and rate arithmetic
//! - [`balance`] - Enforced pool type with a closed transition table
//! - [`account`] - Account state and the effects that mutate it
//! - [`ledger`] - Immutable audit entries and CSV export
//! - [`wal`] - Journal record format
//! - [`store`] - Ledger Store (journal, snapshots, recovery, commit protocol)
//! - [`engine`] - Balance Engine (validated postings)
//! - [`referral`] - Referral Accrual Engine
//! - [`transaction`] - Transaction Coordinator (business operations)

// Core types - must be first!
pub mod core_types;

pub mod account;
pub mod balance;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod money;
pub mod referral;
pub mod store;
pub mod transaction;
pub mod wal;

// Convenient re-exports at crate root
pub use account::{Account, Hold, HoldKind};
pub use balance::{Pool, Pools};
pub use core_types::{Amount, EntryId, ItemId, SeqNum, UserId};
pub use engine::{BalanceEngine, EntryMeta, Posting, WithdrawalOutcome};
pub use error::{IntegrityWarning, LedgerError};
pub use ledger::{LedgerEntry, Operation};
pub use referral::{AccrualOutcome, LinkOutcome, ReferralConfig, ReferralEngine};
pub use store::{Idempotency, LedgerStore, Receipt, RequestFingerprint, StoreConfig};
pub use transaction::{
    Adjustment, LedgerEvent, LedgerObserver, LedgerPolicy, ReconcileReport, TransactionCoordinator,
};
