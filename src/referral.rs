//! Referral Accrual Engine
//!
//! Credits a referrer with a share of a referred user's settled volume, and
//! records new referral links (with the optional sign-up bonus).
//!
//! Each credit is its own unit on the referrer's account, committed after
//! the settlement it derives from. The idempotency key is derived from the
//! settlement entry id (or the referred user id for links), so running the
//! same accrual twice, e.g. from reconciliation, credits once.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::balance::Pool;
use crate::core_types::{Amount, EntryId, UserId};
use crate::engine::{BalanceEngine, EntryMeta};
use crate::error::{IntegrityWarning, LedgerError};
use crate::ledger::Operation;
use crate::money;
use crate::store::{Idempotency, Receipt, RequestFingerprint};

/// Referral program settings. `rate` has no default and must be configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralConfig {
    /// Share of settled volume credited to the referrer, in `[0, 1]`
    pub rate: Decimal,
    /// Credited to the referrer when a referred user opens an account
    #[serde(default)]
    pub signup_bonus: Decimal,
}

/// Idempotency key of the commission for one settlement
pub fn accrual_key(settlement_entry_id: EntryId) -> String {
    format!("accrual:{}", settlement_entry_id)
}

/// Idempotency key of the link between a referrer and a new user
pub fn link_key(referred_user_id: UserId) -> String {
    format!("referral-link:{}", referred_user_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualOutcome {
    Credited {
        referrer_id: UserId,
        amount: Amount,
        receipt: Receipt,
    },
    NoReferrer,
    ZeroEarning,
    Skipped(IntegrityWarning),
    /// Accrual failed after the settlement committed; `reconcile` completes it
    Deferred(LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked { bonus: Amount, receipt: Receipt },
    Skipped(IntegrityWarning),
}

pub struct ReferralEngine {
    engine: Arc<BalanceEngine>,
    rate: Decimal,
    signup_bonus: Amount,
}

impl ReferralEngine {
    pub fn new(engine: Arc<BalanceEngine>, config: &ReferralConfig) -> Result<Self, LedgerError> {
        let rate = money::validate_rate(config.rate)?;
        let signup_bonus = money::parse_decimal(config.signup_bonus)?;
        Ok(Self {
            engine,
            rate,
            signup_bonus,
        })
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    pub fn signup_bonus(&self) -> Amount {
        self.signup_bonus
    }

    /// `floor(settled_amount * rate)`
    pub fn earning(&self, settled_amount: Amount) -> Result<Amount, LedgerError> {
        Ok(money::apply_rate(settled_amount, self.rate)?)
    }

    /// Credit the referrer of `referred_user_id` for one settlement.
    ///
    /// A missing referrer account is reported as a warning, never an error.
    pub async fn accrue(
        &self,
        referred_user_id: UserId,
        settled_amount: Amount,
        settlement_entry_id: EntryId,
    ) -> Result<AccrualOutcome, LedgerError> {
        let store = self.engine.store();
        let Some(referrer_id) = store.get(referred_user_id)?.referrer_id() else {
            return Ok(AccrualOutcome::NoReferrer);
        };

        let amount = self.earning(settled_amount)?;
        if amount == 0 {
            return Ok(AccrualOutcome::ZeroEarning);
        }

        if !store.contains(referrer_id) {
            let warning = IntegrityWarning::MissingReferrer {
                user_id: referred_user_id,
                referrer_id,
            };
            warn!(%warning, settlement_entry_id, "Referral accrual skipped");
            return Ok(AccrualOutcome::Skipped(warning));
        }

        // Keyed by the settled amount, which a rate change cannot alter
        let idempotency = Idempotency::new(
            accrual_key(settlement_entry_id),
            RequestFingerprint::new(Operation::ReferralCommission).amount(settled_amount),
        );
        let receipt = self
            .engine
            .post(referrer_id, Some(&idempotency), |p| {
                p.credit(
                    Pool::Spendable,
                    amount,
                    EntryMeta::new(Operation::ReferralCommission)
                        .related(Some(settlement_entry_id))
                        .counterparty(referred_user_id),
                )?;
                p.add_referral_earnings(amount)
            })
            .await?;

        if !receipt.replayed {
            info!(
                referrer_id,
                referred_user_id,
                settlement_entry_id,
                amount = %money::format_amount_full(amount),
                "Referral commission credited"
            );
        }
        Ok(AccrualOutcome::Credited {
            referrer_id,
            amount,
            receipt,
        })
    }

    /// Add `referred_user_id` to the referrer's referrals and pay the
    /// sign-up bonus, if one is configured.
    pub async fn link(
        &self,
        referred_user_id: UserId,
        referrer_id: UserId,
    ) -> Result<LinkOutcome, LedgerError> {
        if referred_user_id == referrer_id {
            let warning = IntegrityWarning::SelfReferral {
                user_id: referred_user_id,
            };
            warn!(%warning, "Referral link skipped");
            return Ok(LinkOutcome::Skipped(warning));
        }
        if !self.engine.store().contains(referrer_id) {
            let warning = IntegrityWarning::MissingReferrer {
                user_id: referred_user_id,
                referrer_id,
            };
            warn!(%warning, "Referral link skipped");
            return Ok(LinkOutcome::Skipped(warning));
        }

        let bonus = self.signup_bonus;
        let idempotency = Idempotency::new(
            link_key(referred_user_id),
            RequestFingerprint::new(Operation::ReferralLinked),
        );
        let receipt = self
            .engine
            .post(referrer_id, Some(&idempotency), |p| {
                p.add_referral(referred_user_id)?;
                p.memo(
                    0,
                    EntryMeta::new(Operation::ReferralLinked).counterparty(referred_user_id),
                );
                if bonus > 0 {
                    p.credit(
                        Pool::Spendable,
                        bonus,
                        EntryMeta::new(Operation::ReferralBonus).counterparty(referred_user_id),
                    )?;
                    p.add_referral_earnings(bonus)?;
                }
                Ok(())
            })
            .await?;

        if !receipt.replayed {
            info!(referrer_id, referred_user_id, bonus, "Referral linked");
        }
        Ok(LinkOutcome::Linked { bonus, receipt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LedgerStore, StoreConfig};
    use std::str::FromStr;

    async fn setup(rate: &str, bonus: &str) -> (Arc<LedgerStore>, ReferralEngine) {
        let store = Arc::new(LedgerStore::in_memory(StoreConfig::new("unused")));
        let engine = Arc::new(BalanceEngine::new(Arc::clone(&store)));
        let referral = ReferralEngine::new(
            engine,
            &ReferralConfig {
                rate: Decimal::from_str(rate).unwrap(),
                signup_bonus: Decimal::from_str(bonus).unwrap(),
            },
        )
        .unwrap();
        (store, referral)
    }

    #[tokio::test]
    async fn test_invalid_rate_rejected() {
        let store = Arc::new(LedgerStore::in_memory(StoreConfig::new("unused")));
        let engine = Arc::new(BalanceEngine::new(store));
        let config = ReferralConfig {
            rate: Decimal::from_str("1.5").unwrap(),
            signup_bonus: Decimal::ZERO,
        };
        assert!(ReferralEngine::new(engine, &config).is_err());
    }

    #[tokio::test]
    async fn test_accrue_credits_referrer_once() {
        let (store, referral) = setup("0.03", "0").await;
        store.create_if_absent(1, None).await.unwrap();
        store.create_if_absent(2, Some(1)).await.unwrap();

        let outcome = referral.accrue(2, 100_000_000, 77).await.unwrap();
        match &outcome {
            AccrualOutcome::Credited {
                referrer_id,
                amount,
                receipt,
            } => {
                assert_eq!(*referrer_id, 1);
                assert_eq!(*amount, 3_000_000);
                let entry = &receipt.entries[0];
                assert_eq!(entry.operation, Operation::ReferralCommission);
                assert_eq!(entry.related_entry_id, Some(77));
                assert_eq!(entry.counterparty, Some(2));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // Same settlement again: replayed, no second credit
        let again = referral.accrue(2, 100_000_000, 77).await.unwrap();
        assert!(matches!(
            again,
            AccrualOutcome::Credited { ref receipt, .. } if receipt.replayed
        ));

        let referrer = store.get(1).unwrap();
        assert_eq!(referrer.balance(Pool::Spendable), 3_000_000);
        assert_eq!(referrer.referral_earnings(), 3_000_000);
    }

    #[tokio::test]
    async fn test_accrue_without_referrer_is_noop() {
        let (store, referral) = setup("0.03", "0").await;
        store.create_if_absent(2, None).await.unwrap();
        assert_eq!(
            referral.accrue(2, 100_000_000, 1).await.unwrap(),
            AccrualOutcome::NoReferrer
        );
    }

    #[tokio::test]
    async fn test_accrue_zero_earning_is_noop() {
        let (store, referral) = setup("0.03", "0").await;
        store.create_if_absent(1, None).await.unwrap();
        store.create_if_absent(2, Some(1)).await.unwrap();

        assert_eq!(
            referral.accrue(2, 33, 1).await.unwrap(),
            AccrualOutcome::ZeroEarning
        );
        assert!(store.entries(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accrue_missing_referrer_warns() {
        let (store, referral) = setup("0.03", "0").await;
        store.create_if_absent(2, Some(404)).await.unwrap();

        assert_eq!(
            referral.accrue(2, 100_000_000, 1).await.unwrap(),
            AccrualOutcome::Skipped(IntegrityWarning::MissingReferrer {
                user_id: 2,
                referrer_id: 404
            })
        );
    }

    #[tokio::test]
    async fn test_link_with_bonus() {
        let (store, referral) = setup("0.03", "0.04").await;
        store.create_if_absent(1, None).await.unwrap();
        store.create_if_absent(2, Some(1)).await.unwrap();

        let outcome = referral.link(2, 1).await.unwrap();
        assert!(matches!(outcome, LinkOutcome::Linked { bonus: 40_000, .. }));
        referral.link(2, 1).await.unwrap();

        let referrer = store.get(1).unwrap();
        assert!(referrer.referrals().contains(&2));
        assert_eq!(referrer.balance(Pool::Spendable), 40_000);
        assert_eq!(referrer.referral_earnings(), 40_000);

        let ops: Vec<Operation> = store.entries(1).unwrap().iter().map(|e| e.operation).collect();
        assert_eq!(ops, vec![Operation::ReferralLinked, Operation::ReferralBonus]);
    }

    #[tokio::test]
    async fn test_link_rejects_self_and_unknown() {
        let (store, referral) = setup("0.03", "0").await;
        store.create_if_absent(1, None).await.unwrap();

        assert!(matches!(
            referral.link(1, 1).await.unwrap(),
            LinkOutcome::Skipped(IntegrityWarning::SelfReferral { user_id: 1 })
        ));
        assert!(matches!(
            referral.link(1, 99).await.unwrap(),
            LinkOutcome::Skipped(IntegrityWarning::MissingReferrer { .. })
        ));
    }
}
