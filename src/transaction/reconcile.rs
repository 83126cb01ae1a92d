//! Startup reconciliation
//!
//! Cross-account follow-ups (referral links, commissions) commit separately
//! from the unit that caused them. A crash in between leaves them missing;
//! this pass finds and completes them. Every repair goes through the same
//! idempotency keys as the live path, so running it twice changes nothing.

use tracing::{info, warn};

use super::coordinator::TransactionCoordinator;
use crate::error::{IntegrityWarning, LedgerError};
use crate::referral::{AccrualOutcome, LinkOutcome, accrual_key};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub links_repaired: usize,
    pub commissions_repaired: usize,
    /// Micro-USDT credited by the repaired commissions
    pub commission_amount: u128,
    /// Accruals that failed again and remain outstanding
    pub deferred: usize,
    pub warnings: Vec<IntegrityWarning>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.links_repaired == 0 && self.commissions_repaired == 0 && self.deferred == 0
    }
}

impl TransactionCoordinator {
    /// Complete referral links and commissions a crash left out
    pub async fn reconcile(&self) -> Result<ReconcileReport, LedgerError> {
        let store = self.store();
        let mut report = ReconcileReport::default();

        for account in store.accounts() {
            let Some(referrer_id) = account.referrer_id() else {
                continue;
            };
            let user_id = account.user_id();
            let linked = match store.get(referrer_id) {
                Ok(referrer) => referrer.referrals().contains(&user_id),
                Err(LedgerError::NotFound(_)) => {
                    let warning = IntegrityWarning::MissingReferrer {
                        user_id,
                        referrer_id,
                    };
                    warn!(%warning, "Reconcile: referrer account missing");
                    report.warnings.push(warning);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !linked {
                match self.referral().link(user_id, referrer_id).await? {
                    LinkOutcome::Linked { .. } => report.links_repaired += 1,
                    LinkOutcome::Skipped(warning) => report.warnings.push(warning),
                }
            }
        }

        for entry in store.all_entries() {
            if !entry.operation.is_referral_settlement() {
                continue;
            }
            let Some(referrer_id) = store.get(entry.user_id)?.referrer_id() else {
                continue;
            };
            if !store.contains(referrer_id)
                || store
                    .receipt(referrer_id, &accrual_key(entry.entry_id))
                    .is_some()
                || self.referral().earning(entry.amount)? == 0
            {
                continue;
            }

            match self
                .accrue_after(entry.user_id, entry.amount, entry.entry_id)
                .await
            {
                AccrualOutcome::Credited {
                    amount, receipt, ..
                } if !receipt.replayed => {
                    report.commissions_repaired += 1;
                    report.commission_amount += amount as u128;
                }
                AccrualOutcome::Skipped(warning) => report.warnings.push(warning),
                AccrualOutcome::Deferred(_) => report.deferred += 1,
                _ => {}
            }
        }

        if report.is_clean() {
            info!(warnings = report.warnings.len(), "Reconcile: ledger consistent");
        } else {
            warn!(
                links_repaired = report.links_repaired,
                commissions_repaired = report.commissions_repaired,
                commission_amount = %report.commission_amount,
                deferred = report.deferred,
                "Reconcile: repaired missing referral state"
            );
        }
        Ok(report)
    }
}
