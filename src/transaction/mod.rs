//! Transaction Coordinator
//!
//! Sequences business operations (sales, purchases, top-ups, withdrawals,
//! referrals) over the Balance Engine.
//!
//! # Escrow Lifecycles
//!
//! ```text
//! sale:       record_sale ─▶ held ─┬─ confirm_sale ─▶ spendable ─▶ referral accrual
//!                                  └─ void_sale    ─▶ (leaves the ledger)
//!
//! purchase:   reserve_purchase ─▶ held ─┬─ confirm_purchase ─▶ (paid out) ─▶ referral accrual
//!                                       └─ cancel_purchase  ─▶ spendable
//!
//! withdrawal: request ─▶ withdrawal_processing ─┬─ confirm ─▶ (paid out)
//!                                               └─ fail    ─▶ spendable
//! ```
//!
//! # Ordering
//!
//! 1. **Own account first**: the unit on the acting user's account commits
//!    before any follow-up on another account
//! 2. **Follow-ups are keyed**: referral credits and links use keys derived
//!    from the committed entry, so a retry or `reconcile` never pays twice
//! 3. **Notify last**: observers see only durable, first-time commits

pub mod coordinator;
pub mod observer;
pub mod policy;
pub mod reconcile;


pub use coordinator::{
    Adjustment, LedgerSummary, OpenOutcome, SettlementOutcome, TransactionCoordinator,
};
pub use observer::{LedgerEvent, LedgerObserver};
pub use policy::{LedgerPolicy, PurchasePolicy, TopupPolicy, WithdrawalConfig, WithdrawalPolicy};
pub use reconcile::ReconcileReport;
