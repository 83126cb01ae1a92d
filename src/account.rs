use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::balance::{Pool, Pools};
use crate::core_types::{Amount, ItemId, UserId};
use crate::error::LedgerError;

/// Where the funds of an open hold came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldKind {
    /// Sale proceeds awaiting verification (credited straight into `held`)
    SaleProceeds,
    /// Purchase reservation taken from `spendable`
    PurchaseReserve,
}

/// One open escrow hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub amount: Amount,
    pub kind: HoldKind,
}

/// A single deterministic change to an account.
///
/// Mutations record effects; the same effects are written to the journal
/// and re-applied on recovery, so live commits and replay share one code
/// path ([`Account::apply`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Credit { pool: Pool, amount: Amount },
    Debit { pool: Pool, amount: Amount },
    Move { from: Pool, to: Pool, amount: Amount },
    OpenHold { item_id: ItemId, hold: Hold },
    CloseHold { item_id: ItemId },
    /// Open the next withdrawal request (numbered per account)
    OpenWithdrawal { amount: Amount },
    CloseWithdrawal { request: u64 },
    CountBought,
    CountSold { item_id: ItemId },
    AddReferral { user_id: UserId },
    AddReferralEarnings { amount: Amount },
}

/// Account represents one user's balances, counters and referral state.
///
/// # Invariants (enforced by private fields):
/// 1. `user_id`, `referrer_id` and `created_at` are immutable after creation
/// 2. pools only change through [`Effect`]s (which go through [`Pools`])
/// 3. counters, `sold_items`, `referrals` and `referral_earnings` only grow
/// 4. the sum of open hold amounts equals `held`
/// 5. the sum of open withdrawal requests equals `withdrawal_processing`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    user_id: UserId,
    pools: Pools,
    accounts_bought: u64,
    accounts_sold: u64,
    sold_items: Vec<ItemId>,
    referrer_id: Option<UserId>,
    referrals: BTreeSet<UserId>,
    referral_earnings: Amount,
    holds: BTreeMap<ItemId, Hold>,
    withdrawals: BTreeMap<u64, Amount>,
    withdrawals_requested: u64,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    version: u64,
}

impl Account {
    /// Fresh account with zero balances
    pub fn new(user_id: UserId, referrer_id: Option<UserId>, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            pools: Pools::default(),
            accounts_bought: 0,
            accounts_sold: 0,
            sold_items: Vec::new(),
            referrer_id,
            referrals: BTreeSet::new(),
            referral_earnings: 0,
            holds: BTreeMap::new(),
            withdrawals: BTreeMap::new(),
            withdrawals_requested: 0,
            created_at,
            last_activity_at: created_at,
            version: 0,
        }
    }

    #[inline(always)]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[inline(always)]
    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    #[inline]
    pub fn balance(&self, pool: Pool) -> Amount {
        self.pools.get(pool)
    }

    pub fn accounts_bought(&self) -> u64 {
        self.accounts_bought
    }

    pub fn accounts_sold(&self) -> u64 {
        self.accounts_sold
    }

    pub fn sold_items(&self) -> &[ItemId] {
        &self.sold_items
    }

    pub fn referrer_id(&self) -> Option<UserId> {
        self.referrer_id
    }

    pub fn referrals(&self) -> &BTreeSet<UserId> {
        &self.referrals
    }

    pub fn referral_earnings(&self) -> Amount {
        self.referral_earnings
    }

    pub fn holds(&self) -> &BTreeMap<ItemId, Hold> {
        &self.holds
    }

    pub fn hold(&self, item_id: &str) -> Option<&Hold> {
        self.holds.get(item_id)
    }

    /// Open withdrawal requests by request number, oldest first
    pub fn withdrawals(&self) -> &BTreeMap<u64, Amount> {
        &self.withdrawals
    }

    /// Requests ever opened; the next request gets this number
    pub fn withdrawals_requested(&self) -> u64 {
        self.withdrawals_requested
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    /// Commit counter, bumped once per committed unit
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Apply one effect. Fails without touching `self`.
    pub fn apply(&mut self, effect: &Effect) -> Result<(), LedgerError> {
        match effect {
            Effect::Credit { pool, amount } => self.pools.credit(*pool, *amount)?,
            Effect::Debit { pool, amount } => self.pools.debit(*pool, *amount)?,
            Effect::Move { from, to, amount } => self.pools.move_funds(*from, *to, *amount)?,
            Effect::OpenHold { item_id, hold } => {
                if self.holds.contains_key(item_id) {
                    return Err(LedgerError::DuplicateHold {
                        user_id: self.user_id,
                        item_id: item_id.clone(),
                    });
                }
                self.holds.insert(item_id.clone(), hold.clone());
            }
            Effect::CloseHold { item_id } => {
                if self.holds.remove(item_id).is_none() {
                    return Err(LedgerError::HoldNotFound {
                        user_id: self.user_id,
                        item_id: item_id.clone(),
                    });
                }
            }
            Effect::OpenWithdrawal { amount } => {
                let next = self
                    .withdrawals_requested
                    .checked_add(1)
                    .ok_or(LedgerError::Overflow)?;
                self.withdrawals.insert(self.withdrawals_requested, *amount);
                self.withdrawals_requested = next;
            }
            Effect::CloseWithdrawal { request } => {
                if self.withdrawals.remove(request).is_none() {
                    return Err(LedgerError::InvalidTransition(format!(
                        "withdrawal request #{} of account {} is not open",
                        request, self.user_id
                    )));
                }
            }
            Effect::CountBought => {
                self.accounts_bought = self
                    .accounts_bought
                    .checked_add(1)
                    .ok_or(LedgerError::Overflow)?;
            }
            Effect::CountSold { item_id } => {
                self.accounts_sold = self
                    .accounts_sold
                    .checked_add(1)
                    .ok_or(LedgerError::Overflow)?;
                self.sold_items.push(item_id.clone());
            }
            Effect::AddReferral { user_id } => {
                self.referrals.insert(*user_id);
            }
            Effect::AddReferralEarnings { amount } => {
                self.referral_earnings = self
                    .referral_earnings
                    .checked_add(*amount)
                    .ok_or(LedgerError::Overflow)?;
            }
        }
        Ok(())
    }

    /// Apply a whole committed unit and stamp it.
    ///
    /// Used for both the live commit and journal replay. A failure part-way
    /// leaves `self` partially updated, so callers apply to a copy.
    pub fn apply_all(&mut self, effects: &[Effect], at: DateTime<Utc>) -> Result<(), LedgerError> {
        for effect in effects {
            self.apply(effect)?;
        }
        self.version = self.version.wrapping_add(1);
        self.last_activity_at = at;
        Ok(())
    }

    /// Sum of open hold amounts (must equal `held`)
    pub fn open_hold_total(&self) -> u128 {
        self.holds.values().map(|h| h.amount as u128).sum()
    }

    /// Sum of open withdrawal requests (must equal `withdrawal_processing`)
    pub fn open_withdrawal_total(&self) -> u128 {
        self.withdrawals.values().map(|&a| a as u128).sum()
    }
}
