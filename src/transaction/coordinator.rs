//! Transaction Coordinator
//!
//! Public entry point for the bot layer and payment-gateway callbacks.
//! Sequences every business operation as an atomic per-user unit through
//! the Balance Engine, then runs the cross-account follow-ups (referral
//! accrual, notifications) as separate steps in causal order.

use std::sync::Arc;
use tracing::{error, info, warn};

use super::observer::{LedgerEvent, LedgerObserver};
use super::policy::LedgerPolicy;
use crate::account::{Account, HoldKind};
use crate::balance::Pool;
use crate::core_types::{Amount, EntryId, UserId};
use crate::engine::{BalanceEngine, EntryMeta, Posting, WithdrawalOutcome};
use crate::error::{IntegrityWarning, LedgerError};
use crate::ledger::{LedgerEntry, Operation};
use crate::money;
use crate::referral::{AccrualOutcome, LinkOutcome, ReferralConfig, ReferralEngine};
use crate::store::{Idempotency, LedgerStore, Receipt, RequestFingerprint};

/// Operator adjustment direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Credit,
    Debit,
}

/// Result of `open_account`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOutcome {
    pub account: Account,
    pub created: bool,
    /// Referral link written (or replayed) for this account
    pub link: Option<LinkOutcome>,
    pub warnings: Vec<IntegrityWarning>,
}

/// Result of an operation that settles a sale or purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub receipt: Receipt,
    pub accrual: AccrualOutcome,
}

/// Totals across all accounts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub accounts: usize,
    pub spendable: u128,
    pub held: u128,
    pub topup: u128,
    pub withdrawal_processing: u128,
    pub referral_earnings: u128,
    pub open_holds: usize,
}

impl LedgerSummary {
    pub fn total(&self) -> u128 {
        self.spendable + self.held + self.topup + self.withdrawal_processing
    }
}

pub struct TransactionCoordinator {
    store: Arc<LedgerStore>,
    engine: Arc<BalanceEngine>,
    referral: ReferralEngine,
    policy: LedgerPolicy,
    observers: Vec<Arc<dyn LedgerObserver>>,
}

impl TransactionCoordinator {
    pub fn new(
        store: Arc<LedgerStore>,
        referral: &ReferralConfig,
        policy: LedgerPolicy,
    ) -> Result<Self, LedgerError> {
        let engine = Arc::new(BalanceEngine::new(Arc::clone(&store)));
        let referral = ReferralEngine::new(Arc::clone(&engine), referral)?;
        Ok(Self {
            store,
            engine,
            referral,
            policy,
            observers: Vec::new(),
        })
    }

    /// Register an observer notified after commits
    pub fn add_observer(&mut self, observer: Arc<dyn LedgerObserver>) {
        self.observers.push(observer);
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<BalanceEngine> {
        &self.engine
    }

    pub(super) fn referral(&self) -> &ReferralEngine {
        &self.referral
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    // ============================================================
    // ACCOUNTS
    // ============================================================

    /// Open an account on first contact.
    ///
    /// The referrer is only recorded at creation; self-referral and unknown
    /// referrers are dropped with a warning. Calling again for an existing
    /// account completes a referral link a crash may have left out.
    pub async fn open_account(
        &self,
        user_id: UserId,
        referrer_id: Option<UserId>,
    ) -> Result<OpenOutcome, LedgerError> {
        let mut warnings = Vec::new();
        let referrer_id = match referrer_id {
            Some(r) if r == user_id => {
                let warning = IntegrityWarning::SelfReferral { user_id };
                warn!(%warning, "Referrer ignored");
                warnings.push(warning);
                None
            }
            Some(r) if !self.store.contains(r) => {
                let warning = IntegrityWarning::MissingReferrer {
                    user_id,
                    referrer_id: r,
                };
                warn!(%warning, "Referrer ignored");
                warnings.push(warning);
                None
            }
            other => other,
        };

        let (account, created) = self.store.create_if_absent(user_id, referrer_id).await?;
        if created {
            info!(user_id, ?referrer_id, "Account opened");
        }

        let mut link = None;
        if let Some(referrer) = account.referrer_id() {
            let linked = self
                .store
                .get(referrer)
                .map(|r| r.referrals().contains(&user_id))
                .unwrap_or(false);
            if created || !linked {
                let outcome = self.referral.link(user_id, referrer).await?;
                match &outcome {
                    LinkOutcome::Linked { bonus, receipt } if !receipt.replayed => {
                        self.notify(LedgerEvent::ReferralLinked {
                            referrer_id: referrer,
                            referred_user_id: user_id,
                            bonus: *bonus,
                        })
                        .await;
                    }
                    LinkOutcome::Skipped(warning) => warnings.push(warning.clone()),
                    _ => {}
                }
                link = Some(outcome);
            }
        }

        Ok(OpenOutcome {
            account,
            created,
            link,
            warnings,
        })
    }

    pub fn account(&self, user_id: UserId) -> Result<Account, LedgerError> {
        self.store.get(user_id)
    }

    /// Ledger entries of one account, oldest first
    pub fn history(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.entries(user_id)
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary::default();
        for account in self.store.accounts() {
            let pools = account.pools();
            summary.accounts += 1;
            summary.spendable += pools.spendable() as u128;
            summary.held += pools.held() as u128;
            summary.topup += pools.topup() as u128;
            summary.withdrawal_processing += pools.withdrawal_processing() as u128;
            summary.referral_earnings += account.referral_earnings() as u128;
            summary.open_holds += account.holds().len();
        }
        summary
    }

    // ============================================================
    // SALES
    // ============================================================

    /// Seller delivered an item: proceeds go to `held` pending verification
    pub async fn record_sale(
        &self,
        seller: UserId,
        item_id: &str,
        proceeds: Amount,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::SaleHold)
                .amount(proceeds)
                .item(item_id),
        );
        let receipt = self
            .engine
            .post(seller, Some(&idempotency), |p| {
                p.open_hold(
                    item_id,
                    proceeds,
                    HoldKind::SaleProceeds,
                    EntryMeta::new(Operation::SaleHold).item(item_id),
                )
            })
            .await?;
        info!(
            seller,
            item_id,
            amount = %money::format_amount_full(proceeds),
            replayed = receipt.replayed,
            "Sale recorded"
        );
        Ok(receipt)
    }

    /// Verification passed: `held -> spendable`, count the sale, pay the
    /// seller's referrer
    pub async fn confirm_sale(
        &self,
        seller: UserId,
        item_id: &str,
        idempotency_key: &str,
    ) -> Result<SettlementOutcome, LedgerError> {
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::SaleSettled).item(item_id),
        );
        let receipt = self
            .engine
            .post(seller, Some(&idempotency), |p| {
                let opened = opening_entry(p, item_id, HoldKind::SaleProceeds)?;
                p.release_hold(
                    item_id,
                    EntryMeta::new(Operation::SaleSettled)
                        .related(opened)
                        .item(item_id),
                )?;
                p.count_sold(item_id)
            })
            .await?;

        let settlement = settlement_entry(&receipt, Operation::SaleSettled)?;
        let (amount, entry_id) = (settlement.amount, settlement.entry_id);
        if !receipt.replayed {
            info!(seller, item_id, amount, entry_id, "Sale settled");
            self.notify(LedgerEvent::SaleSettled {
                seller,
                item_id: item_id.to_string(),
                amount,
                entry_id,
            })
            .await;
        }

        let accrual = self.accrue_after(seller, amount, entry_id).await;
        Ok(SettlementOutcome { receipt, accrual })
    }

    /// Verification failed: the proceeds never existed, so they leave the ledger
    pub async fn void_sale(
        &self,
        seller: UserId,
        item_id: &str,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::SaleVoided).item(item_id),
        );
        let receipt = self
            .engine
            .post(seller, Some(&idempotency), |p| {
                let opened = opening_entry(p, item_id, HoldKind::SaleProceeds)?;
                p.consume_hold(
                    item_id,
                    EntryMeta::new(Operation::SaleVoided)
                        .related(opened)
                        .item(item_id),
                )
                .map(|_| ())
            })
            .await?;

        if !receipt.replayed {
            let amount = settlement_entry(&receipt, Operation::SaleVoided)?.amount;
            info!(seller, item_id, amount, "Sale voided");
            self.notify(LedgerEvent::SaleVoided {
                seller,
                item_id: item_id.to_string(),
                amount,
            })
            .await;
        }
        Ok(receipt)
    }

    // ============================================================
    // PURCHASES
    // ============================================================

    /// Immediate purchase paid from the configured purchase pool
    pub async fn record_purchase(
        &self,
        buyer: UserId,
        item_id: &str,
        cost: Amount,
        idempotency_key: &str,
    ) -> Result<SettlementOutcome, LedgerError> {
        let pool = self.policy.purchase.pool();
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::Purchase)
                .amount(cost)
                .item(item_id),
        );
        let receipt = self
            .engine
            .post(buyer, Some(&idempotency), |p| {
                p.debit(pool, cost, EntryMeta::new(Operation::Purchase).item(item_id))?;
                p.count_bought()
            })
            .await?;
        self.after_purchase(buyer, item_id, receipt, Operation::Purchase)
            .await
    }

    /// Escrowed purchase: `spendable -> held` until delivery is confirmed
    pub async fn reserve_purchase(
        &self,
        buyer: UserId,
        item_id: &str,
        cost: Amount,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::PurchaseReserved)
                .amount(cost)
                .item(item_id),
        );
        let receipt = self
            .engine
            .post(buyer, Some(&idempotency), |p| {
                p.open_hold(
                    item_id,
                    cost,
                    HoldKind::PurchaseReserve,
                    EntryMeta::new(Operation::PurchaseReserved).item(item_id),
                )
            })
            .await?;
        info!(buyer, item_id, cost, replayed = receipt.replayed, "Purchase reserved");
        Ok(receipt)
    }

    /// Delivery confirmed: the reserved funds are paid out
    pub async fn confirm_purchase(
        &self,
        buyer: UserId,
        item_id: &str,
        idempotency_key: &str,
    ) -> Result<SettlementOutcome, LedgerError> {
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::PurchaseSettled).item(item_id),
        );
        let receipt = self
            .engine
            .post(buyer, Some(&idempotency), |p| {
                let opened = opening_entry(p, item_id, HoldKind::PurchaseReserve)?;
                p.consume_hold(
                    item_id,
                    EntryMeta::new(Operation::PurchaseSettled)
                        .related(opened)
                        .item(item_id),
                )?;
                p.count_bought()
            })
            .await?;
        self.after_purchase(buyer, item_id, receipt, Operation::PurchaseSettled)
            .await
    }

    /// Reservation cancelled: funds return to `spendable`
    pub async fn cancel_purchase(
        &self,
        buyer: UserId,
        item_id: &str,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::PurchaseCancelled).item(item_id),
        );
        let receipt = self
            .engine
            .post(buyer, Some(&idempotency), |p| {
                let opened = opening_entry(p, item_id, HoldKind::PurchaseReserve)?;
                p.release_hold(
                    item_id,
                    EntryMeta::new(Operation::PurchaseCancelled)
                        .related(opened)
                        .item(item_id),
                )
                .map(|_| ())
            })
            .await?;
        info!(buyer, item_id, replayed = receipt.replayed, "Purchase cancelled");
        Ok(receipt)
    }

    async fn after_purchase(
        &self,
        buyer: UserId,
        item_id: &str,
        receipt: Receipt,
        operation: Operation,
    ) -> Result<SettlementOutcome, LedgerError> {
        let settlement = settlement_entry(&receipt, operation)?;
        let (amount, entry_id) = (settlement.amount, settlement.entry_id);
        if !receipt.replayed {
            info!(buyer, item_id, amount, entry_id, "Purchase settled");
            self.notify(LedgerEvent::PurchaseSettled {
                buyer,
                item_id: item_id.to_string(),
                amount,
                entry_id,
            })
            .await;
        }

        let accrual = self.accrue_after(buyer, amount, entry_id).await;
        Ok(SettlementOutcome { receipt, accrual })
    }

    // ============================================================
    // TOP-UP / WITHDRAWAL
    // ============================================================

    /// Payment gateway confirmed a top-up
    pub async fn topup(
        &self,
        user_id: UserId,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        let pool = self.policy.topup.pool();
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::Topup).amount(amount),
        );
        let receipt = self
            .engine
            .post(user_id, Some(&idempotency), |p| {
                p.credit(pool, amount, Operation::Topup.into())
            })
            .await?;
        if !receipt.replayed {
            info!(user_id, %pool, amount = %money::format_amount_full(amount), "Top-up credited");
            self.notify(LedgerEvent::TopupCredited {
                user_id,
                pool,
                amount,
            })
            .await;
        }
        Ok(receipt)
    }

    /// `spendable -> withdrawal_processing`, subject to the minimums
    pub async fn request_withdrawal(
        &self,
        user_id: UserId,
        amount: Amount,
        method: Option<&str>,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        let withdrawal = &self.policy.withdrawal;
        let mut fingerprint = RequestFingerprint::new(Operation::WithdrawalRequested).amount(amount);
        if let Some(method) = method {
            fingerprint = fingerprint.detail(method);
        }
        let idempotency = Idempotency::new(idempotency_key, fingerprint);
        let receipt = self
            .engine
            .post(user_id, Some(&idempotency), |p| {
                withdrawal.check(user_id, method, amount)?;
                p.open_withdrawal(amount).map(|_| ())
            })
            .await?;
        if !receipt.replayed {
            info!(user_id, amount, ?method, "Withdrawal requested");
            self.notify(LedgerEvent::WithdrawalRequested {
                user_id,
                amount,
                method: method.map(str::to_string),
            })
            .await;
        }
        Ok(receipt)
    }

    /// Payout confirmed: funds leave the ledger
    pub async fn confirm_withdrawal(
        &self,
        user_id: UserId,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::WithdrawalPaid).amount(amount),
        );
        let receipt = self
            .engine
            .post(user_id, Some(&idempotency), |p| {
                p.close_withdrawal(amount, WithdrawalOutcome::Paid).map(|_| ())
            })
            .await?;
        if !receipt.replayed {
            info!(user_id, amount, "Withdrawal paid");
            self.notify(LedgerEvent::WithdrawalPaid { user_id, amount })
                .await;
        }
        Ok(receipt)
    }

    /// Payout failed: funds return to `spendable`
    pub async fn fail_withdrawal(
        &self,
        user_id: UserId,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(Operation::WithdrawalReturned).amount(amount),
        );
        let receipt = self
            .engine
            .post(user_id, Some(&idempotency), |p| {
                p.close_withdrawal(amount, WithdrawalOutcome::Returned)
                    .map(|_| ())
            })
            .await?;
        if !receipt.replayed {
            warn!(user_id, amount, "Withdrawal returned to spendable");
            self.notify(LedgerEvent::WithdrawalReturned { user_id, amount })
                .await;
        }
        Ok(receipt)
    }

    // ============================================================
    // OPERATOR
    // ============================================================

    /// Manual credit/debit of `spendable` or `topup`
    pub async fn adjust_balance(
        &self,
        user_id: UserId,
        pool: Pool,
        direction: Adjustment,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<Receipt, LedgerError> {
        if !matches!(pool, Pool::Spendable | Pool::Topup) {
            return Err(LedgerError::NotAdjustable(pool));
        }
        let operation = match direction {
            Adjustment::Credit => Operation::AdminCredit,
            Adjustment::Debit => Operation::AdminDebit,
        };
        let idempotency = Idempotency::new(
            idempotency_key,
            RequestFingerprint::new(operation).amount(amount).pool(pool),
        );
        let receipt = self
            .engine
            .post(user_id, Some(&idempotency), |p| match direction {
                Adjustment::Credit => p.credit(pool, amount, Operation::AdminCredit.into()),
                Adjustment::Debit => p.debit(pool, amount, Operation::AdminDebit.into()),
            })
            .await?;
        if !receipt.replayed {
            warn!(user_id, %pool, ?direction, amount, "Operator balance adjustment");
        }
        Ok(receipt)
    }

    // ============================================================
    // HELPERS
    // ============================================================

    pub(super) async fn accrue_after(
        &self,
        user_id: UserId,
        settled_amount: Amount,
        settlement_entry_id: EntryId,
    ) -> AccrualOutcome {
        match self
            .referral
            .accrue(user_id, settled_amount, settlement_entry_id)
            .await
        {
            Ok(outcome) => {
                if let AccrualOutcome::Credited {
                    referrer_id,
                    amount,
                    receipt,
                } = &outcome
                    && !receipt.replayed
                    && let Some(entry) = receipt.entries.first()
                {
                    self.notify(LedgerEvent::ReferralCredited {
                        referrer_id: *referrer_id,
                        referred_user_id: user_id,
                        amount: *amount,
                        entry_id: entry.entry_id,
                    })
                    .await;
                }
                outcome
            }
            Err(e) => {
                error!(
                    user_id,
                    settlement_entry_id,
                    error = %e,
                    "Referral accrual failed, left for reconciliation"
                );
                AccrualOutcome::Deferred(e)
            }
        }
    }

    async fn notify(&self, event: LedgerEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.on_event(&event).await {
                warn!(
                    observer = observer.name(),
                    error = %e,
                    ?event,
                    "Observer failed"
                );
            }
        }
    }
}

/// Entry that opened the hold on `item_id`, checked against the expected
/// hold kind
fn opening_entry(
    p: &Posting<'_, '_>,
    item_id: &str,
    kind: HoldKind,
) -> Result<Option<EntryId>, LedgerError> {
    let hold = p.hold(item_id).ok_or_else(|| LedgerError::HoldNotFound {
        user_id: p.user_id(),
        item_id: item_id.to_string(),
    })?;
    if hold.kind != kind {
        return Err(LedgerError::InvalidTransition(format!(
            "hold on {} is {:?}, expected {:?}",
            item_id, hold.kind, kind
        )));
    }
    let operation = match kind {
        HoldKind::SaleProceeds => Operation::SaleHold,
        HoldKind::PurchaseReserve => Operation::PurchaseReserved,
    };
    Ok(p
        .last_entry(|e| e.operation == operation && e.item_id.as_deref() == Some(item_id))
        .map(|e| e.entry_id))
}

fn settlement_entry(receipt: &Receipt, operation: Operation) -> Result<&LedgerEntry, LedgerError> {
    receipt
        .entries
        .iter()
        .find(|e| e.operation == operation)
        .ok_or_else(|| {
            LedgerError::Corrupted(format!(
                "receipt for user {} has no {} entry",
                receipt.user_id, operation
            ))
        })
}
