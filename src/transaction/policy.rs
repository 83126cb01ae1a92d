//! Configurable money-routing policies

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::balance::Pool;
use crate::core_types::{Amount, UserId};
use crate::error::LedgerError;
use crate::money;

/// Which pool a payment-gateway top-up lands in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopupPolicy {
    /// Separate `topup` pool, spendable on purchases but never withdrawable
    #[default]
    CreditTopup,
    CreditSpendable,
}

impl TopupPolicy {
    pub fn pool(&self) -> Pool {
        match self {
            TopupPolicy::CreditTopup => Pool::Topup,
            TopupPolicy::CreditSpendable => Pool::Spendable,
        }
    }
}

/// Which pool a direct purchase is paid from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchasePolicy {
    #[default]
    Spendable,
    Topup,
}

impl PurchasePolicy {
    pub fn pool(&self) -> Pool {
        match self {
            PurchasePolicy::Spendable => Pool::Spendable,
            PurchasePolicy::Topup => Pool::Topup,
        }
    }
}

/// Withdrawal minimums as configured (USDT decimals)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WithdrawalConfig {
    pub global_minimum: Decimal,
    /// Per-user override of the global minimum
    pub user_minimums: BTreeMap<UserId, Decimal>,
    /// Per payout method (e.g. "trc20", "bep20")
    pub method_minimums: BTreeMap<String, Decimal>,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            global_minimum: Decimal::ONE,
            user_minimums: BTreeMap::new(),
            method_minimums: BTreeMap::new(),
        }
    }
}

/// Withdrawal minimums in micro-USDT
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WithdrawalPolicy {
    global_minimum: Amount,
    user_minimums: BTreeMap<UserId, Amount>,
    method_minimums: BTreeMap<String, Amount>,
}

impl WithdrawalPolicy {
    pub fn from_config(config: &WithdrawalConfig) -> Result<Self, LedgerError> {
        let user_minimums = config
            .user_minimums
            .iter()
            .map(|(user, d)| Ok((*user, money::parse_decimal(*d)?)))
            .collect::<Result<_, LedgerError>>()?;
        let method_minimums = config
            .method_minimums
            .iter()
            .map(|(method, d)| Ok((method.to_lowercase(), money::parse_decimal(*d)?)))
            .collect::<Result<_, LedgerError>>()?;
        Ok(Self {
            global_minimum: money::parse_decimal(config.global_minimum)?,
            user_minimums,
            method_minimums,
        })
    }

    /// `max(method minimum, user override or global minimum)`
    pub fn minimum(&self, user_id: UserId, method: Option<&str>) -> Amount {
        let base = self
            .user_minimums
            .get(&user_id)
            .copied()
            .unwrap_or(self.global_minimum);
        let by_method = method
            .and_then(|m| self.method_minimums.get(&m.to_lowercase()))
            .copied()
            .unwrap_or(0);
        base.max(by_method)
    }

    pub fn check(&self, user_id: UserId, method: Option<&str>, amount: Amount) -> Result<(), LedgerError> {
        let minimum = self.minimum(user_id, method);
        if amount < minimum {
            return Err(LedgerError::BelowWithdrawalMinimum {
                requested: amount,
                minimum,
            });
        }
        Ok(())
    }
}

/// All routing policies the coordinator applies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerPolicy {
    pub topup: TopupPolicy,
    pub purchase: PurchasePolicy,
    pub withdrawal: WithdrawalPolicy,
}
