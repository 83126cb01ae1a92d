//! Ledger Error Types
//!
//! One error enum for every layer from the store up to the coordinator.
//! Errors propagate unchanged; the caller decides whether to retry
//! (see [`LedgerError::is_retryable`]).

use thiserror::Error;

use crate::balance::{Pool, PoolError};
use crate::core_types::{Amount, ItemId, UserId};
use crate::money::MoneyError;

/// Ledger error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // === Lookup Errors ===
    #[error("Account not found: {0}")]
    NotFound(UserId),

    #[error("No open hold for item {item_id} on account {user_id}")]
    HoldNotFound { user_id: UserId, item_id: ItemId },

    #[error("Item {item_id} already has an open hold on account {user_id}")]
    DuplicateHold { user_id: UserId, item_id: ItemId },

    #[error("No open withdrawal request of {amount} on account {user_id}")]
    WithdrawalNotFound { user_id: UserId, amount: Amount },

    // === Balance Errors ===
    #[error("Insufficient funds in {pool}: available {available}, requested {requested}")]
    InsufficientFunds {
        pool: Pool,
        available: Amount,
        requested: Amount,
    },

    #[error("Invalid pool transition: {0}")]
    InvalidTransition(String),

    #[error("Pool is not adjustable by operators: {0}")]
    NotAdjustable(Pool),

    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Withdrawal of {requested} is below the minimum of {minimum}")]
    BelowWithdrawalMinimum { requested: Amount, minimum: Amount },

    #[error("Amount would cause overflow")]
    Overflow,

    // === Store Errors ===
    #[error("Concurrent modification detected: {0}")]
    Conflict(String),

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Ledger data corrupted: {0}")]
    Corrupted(String),
}

impl LedgerError {
    /// Stable error code for collaborators (bot layer, gateway callbacks)
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::HoldNotFound { .. } => "HOLD_NOT_FOUND",
            LedgerError::DuplicateHold { .. } => "DUPLICATE_HOLD",
            LedgerError::WithdrawalNotFound { .. } => "WITHDRAWAL_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::InvalidTransition(_) => "INVALID_TRANSITION",
            LedgerError::NotAdjustable(_) => "NOT_ADJUSTABLE",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::BelowWithdrawalMinimum { .. } => "BELOW_WITHDRAWAL_MINIMUM",
            LedgerError::Overflow => "OVERFLOW",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            LedgerError::Corrupted(_) => "CORRUPTED",
        }
    }

    /// Safe to retry with the same idempotency key
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Conflict(_) | LedgerError::StoreUnavailable(_)
        )
    }
}

impl From<PoolError> for LedgerError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Insufficient {
                pool,
                available,
                requested,
            } => LedgerError::InsufficientFunds {
                pool,
                available,
                requested,
            },
            PoolError::InvalidTransition { from, to } => {
                LedgerError::InvalidTransition(format!("{} -> {}", from, to))
            }
            PoolError::Overflow(_) => LedgerError::Overflow,
        }
    }
}

impl From<MoneyError> for LedgerError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::Overflow => LedgerError::Overflow,
            _ => LedgerError::InvalidAmount,
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::StoreUnavailable(e.to_string())
    }
}

/// Non-fatal data-integrity findings.
///
/// Logged with `tracing::warn!` and reported in outcomes, never returned as
/// an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityWarning {
    #[error("Referrer {referrer_id} of user {user_id} has no account")]
    MissingReferrer { user_id: UserId, referrer_id: UserId },

    #[error("User {user_id} cannot refer themselves")]
    SelfReferral { user_id: UserId },
}
