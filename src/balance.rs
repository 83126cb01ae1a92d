/// ENFORCED POOL TYPE - Used by the Balance Engine
///
/// This is the SINGLE source of truth for pool arithmetic.
/// ALL pool mutations MUST go through these methods.
///
/// # Enforcement Strategy:
/// 1. Fields are PRIVATE - no direct access
/// 2. All mutations return Result - errors are explicit
/// 3. Transitions are checked against a closed table (`Pool::can_move_to`)
/// 4. checked_add/sub - overflow protection
/// 5. `total()` is the quantity the conservation check is written against
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::Amount;

/// One of the four named balance buckets of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Pool {
    /// Main balance: withdrawable, spendable on purchases
    Spendable = 1,
    /// Escrow: sale proceeds pending verification, reserved purchases
    Held = 2,
    /// Funds topped up through the payment gateway
    Topup = 3,
    /// Withdrawal requested, payout not yet confirmed
    WithdrawalProcessing = 4,
}

impl Pool {
    /// The only pool-to-pool transitions the engine accepts.
    ///
    /// ```text
    /// spendable ──hold/reserve──▶ held ──settle/refund──▶ spendable
    /// spendable ──withdraw req──▶ withdrawal_processing ──payout failed──▶ spendable
    /// ```
    pub fn can_move_to(&self, to: Pool) -> bool {
        matches!(
            (self, to),
            (Pool::Spendable, Pool::Held)
                | (Pool::Held, Pool::Spendable)
                | (Pool::Spendable, Pool::WithdrawalProcessing)
                | (Pool::WithdrawalProcessing, Pool::Spendable)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::Spendable => "spendable",
            Pool::Held => "held",
            Pool::Topup => "topup",
            Pool::WithdrawalProcessing => "withdrawal_processing",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a pool operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Pool holds less than requested
    Insufficient {
        pool: Pool,
        available: Amount,
        requested: Amount,
    },
    /// Transition not in the allowed table
    InvalidTransition { from: Pool, to: Pool },
    /// Arithmetic overflow (indicates corruption or absurd input)
    Overflow(Pool),
}

/// Balances of one account across all pools
///
/// # Invariants (ENFORCED by private fields):
/// - every pool is non-negative (u64 + checked_sub)
/// - `move_funds` never changes `total()`
/// - `version` increments on every successful mutation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pools {
    spendable: Amount,             // PRIVATE - credit/debit/move only
    held: Amount,                  // PRIVATE - credit/debit/move only
    topup: Amount,                 // PRIVATE - credit/debit only
    withdrawal_processing: Amount, // PRIVATE - move in, debit (payout) or move out
    version: u64,                  // PRIVATE - incremented on every mutation
}

impl Pools {
    // ============================================================
    // READ-ONLY GETTERS (safe to expose)
    // ============================================================

    #[inline(always)]
    pub const fn spendable(&self) -> Amount {
        self.spendable
    }

    #[inline(always)]
    pub const fn held(&self) -> Amount {
        self.held
    }

    #[inline(always)]
    pub const fn topup(&self) -> Amount {
        self.topup
    }

    #[inline(always)]
    pub const fn withdrawal_processing(&self) -> Amount {
        self.withdrawal_processing
    }

    #[inline(always)]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Balance of a named pool
    #[inline]
    pub const fn get(&self, pool: Pool) -> Amount {
        match pool {
            Pool::Spendable => self.spendable,
            Pool::Held => self.held,
            Pool::Topup => self.topup,
            Pool::WithdrawalProcessing => self.withdrawal_processing,
        }
    }

    /// Sum of all four pools, widened so it can never overflow
    #[inline]
    pub const fn total(&self) -> u128 {
        self.spendable as u128
            + self.held as u128
            + self.topup as u128
            + self.withdrawal_processing as u128
    }

    // ============================================================
    // VALIDATED MUTATIONS (ENFORCED operations)
    // ============================================================

    /// Increase a pool
    pub fn credit(&mut self, pool: Pool, amount: Amount) -> Result<(), PoolError> {
        let next = self
            .get(pool)
            .checked_add(amount)
            .ok_or(PoolError::Overflow(pool))?;
        *self.slot_mut(pool) = next;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Decrease a pool; refuses to go below zero
    pub fn debit(&mut self, pool: Pool, amount: Amount) -> Result<(), PoolError> {
        let available = self.get(pool);
        let next = available
            .checked_sub(amount)
            .ok_or(PoolError::Insufficient {
                pool,
                available,
                requested: amount,
            })?;
        *self.slot_mut(pool) = next;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Atomic debit-then-credit between two pools of this account.
    ///
    /// Validates everything first so a failure leaves `self` untouched.
    pub fn move_funds(&mut self, from: Pool, to: Pool, amount: Amount) -> Result<(), PoolError> {
        if !from.can_move_to(to) {
            return Err(PoolError::InvalidTransition { from, to });
        }
        let available = self.get(from);
        let from_next = available
            .checked_sub(amount)
            .ok_or(PoolError::Insufficient {
                pool: from,
                available,
                requested: amount,
            })?;
        let to_next = self
            .get(to)
            .checked_add(amount)
            .ok_or(PoolError::Overflow(to))?;

        *self.slot_mut(from) = from_next;
        *self.slot_mut(to) = to_next;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    fn slot_mut(&mut self, pool: Pool) -> &mut Amount {
        match pool {
            Pool::Spendable => &mut self.spendable,
            Pool::Held => &mut self.held,
            Pool::Topup => &mut self.topup,
            Pool::WithdrawalProcessing => &mut self.withdrawal_processing,
        }
    }
}

// ============================================================
// TESTS - Prove enforcement works
// ============================================================
