//! Balance Engine
//!
//! Enforces the pool-transfer state machine on top of the store:
//!
//! ```text
//! spendable ──reserve──▶ held ──settle/cancel──▶ spendable
//! (sale proceeds) ──▶ held ──void/consume──▶ removed
//! spendable ──request──▶ withdrawal_processing ──payout──▶ removed
//!                        withdrawal_processing ──fail────▶ spendable
//! (withdrawal_processing only moves by opening or closing a request)
//! topup ◀──credit / debit──▶ outside
//! ```
//!
//! Composite operations run through a [`Posting`] so several primitives
//! plus counter and hold effects commit as one unit.

use std::sync::Arc;
use tracing::debug;

use crate::account::{Effect, Hold, HoldKind};
use crate::balance::Pool;
use crate::core_types::{Amount, EntryId, ItemId, UserId};
use crate::error::LedgerError;
use crate::ledger::{DraftEntry, EntryKind, LedgerEntry, Operation, PoolChange};
use crate::store::{Draft, Idempotency, LedgerStore, Receipt, RequestFingerprint};

/// Business labels attached to an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub operation: Operation,
    pub related_entry_id: Option<EntryId>,
    pub item_id: Option<ItemId>,
    pub counterparty: Option<UserId>,
}

impl EntryMeta {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            related_entry_id: None,
            item_id: None,
            counterparty: None,
        }
    }

    pub fn related(mut self, entry_id: Option<EntryId>) -> Self {
        self.related_entry_id = entry_id;
        self
    }

    pub fn item(mut self, item_id: impl Into<ItemId>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    pub fn counterparty(mut self, user_id: UserId) -> Self {
        self.counterparty = Some(user_id);
        self
    }
}

impl From<Operation> for EntryMeta {
    fn from(operation: Operation) -> Self {
        Self::new(operation)
    }
}

/// How an open withdrawal request ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    /// Payout sent: the amount leaves the ledger
    Paid,
    /// Payout failed: the amount returns to `spendable`
    Returned,
}

/// Unit of work over one account's draft.
///
/// Every pool change made here records both the effect and its ledger
/// entry, which is what the store's conservation check expects.
pub struct Posting<'a, 'h> {
    draft: &'a mut Draft<'h>,
}

impl<'a, 'h> Posting<'a, 'h> {
    pub fn new(draft: &'a mut Draft<'h>) -> Self {
        Self { draft }
    }

    pub fn user_id(&self) -> UserId {
        self.draft.account().user_id()
    }

    pub fn balance(&self, pool: Pool) -> Amount {
        self.draft.account().balance(pool)
    }

    pub fn hold(&self, item_id: &str) -> Option<&Hold> {
        self.draft.account().hold(item_id)
    }

    pub fn referrer_id(&self) -> Option<UserId> {
        self.draft.account().referrer_id()
    }

    /// Committed entries of this account, oldest first
    pub fn history(&self) -> &'h [LedgerEntry] {
        self.draft.history()
    }

    /// Most recent committed entry matching `predicate`
    pub fn last_entry<P>(&self, predicate: P) -> Option<&'h LedgerEntry>
    where
        P: Fn(&LedgerEntry) -> bool,
    {
        self.history().iter().rev().find(|e| predicate(e))
    }

    // ============================================================
    // POOL PRIMITIVES
    // ============================================================

    /// Credit `spendable` or `topup`
    pub fn credit(&mut self, pool: Pool, amount: Amount, meta: EntryMeta) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if !matches!(pool, Pool::Spendable | Pool::Topup) {
            return Err(LedgerError::InvalidTransition(format!(
                "credit to {} is not allowed",
                pool
            )));
        }
        self.credit_unchecked(pool, amount, meta)
    }

    /// Debit `spendable` or `topup`. `held` and `withdrawal_processing`
    /// are only debited when closing a hold or a withdrawal request.
    pub fn debit(&mut self, pool: Pool, amount: Amount, meta: EntryMeta) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if !matches!(pool, Pool::Spendable | Pool::Topup) {
            return Err(LedgerError::InvalidTransition(format!(
                "debit from {} is not allowed",
                pool
            )));
        }
        self.debit_unchecked(pool, amount, meta)
    }

    // ============================================================
    // HOLDS
    // ============================================================

    /// Open a hold for `item_id`.
    ///
    /// Sale proceeds are credited into `held`; a purchase reservation moves
    /// funds `spendable -> held`.
    pub fn open_hold(
        &mut self,
        item_id: &str,
        amount: Amount,
        kind: HoldKind,
        meta: EntryMeta,
    ) -> Result<(), LedgerError> {
        check_amount(amount)?;
        if self.hold(item_id).is_some() {
            return Err(LedgerError::DuplicateHold {
                user_id: self.user_id(),
                item_id: item_id.to_string(),
            });
        }
        match kind {
            HoldKind::SaleProceeds => self.credit_unchecked(Pool::Held, amount, meta)?,
            HoldKind::PurchaseReserve => {
                self.move_unchecked(Pool::Spendable, Pool::Held, amount, meta)?
            }
        }
        self.draft.record(Effect::OpenHold {
            item_id: item_id.to_string(),
            hold: Hold { amount, kind },
        })
    }

    /// Close the hold and return its amount to `spendable`
    pub fn release_hold(&mut self, item_id: &str, meta: EntryMeta) -> Result<Hold, LedgerError> {
        let hold = self.take_hold(item_id)?;
        self.move_unchecked(Pool::Held, Pool::Spendable, hold.amount, meta)?;
        self.close_hold(item_id)?;
        Ok(hold)
    }

    /// Close the hold and remove its amount from the ledger
    pub fn consume_hold(&mut self, item_id: &str, meta: EntryMeta) -> Result<Hold, LedgerError> {
        let hold = self.take_hold(item_id)?;
        self.debit_unchecked(Pool::Held, hold.amount, meta)?;
        self.close_hold(item_id)?;
        Ok(hold)
    }

    fn take_hold(&self, item_id: &str) -> Result<Hold, LedgerError> {
        self.hold(item_id)
            .cloned()
            .ok_or_else(|| LedgerError::HoldNotFound {
                user_id: self.user_id(),
                item_id: item_id.to_string(),
            })
    }

    fn close_hold(&mut self, item_id: &str) -> Result<(), LedgerError> {
        self.draft.record(Effect::CloseHold {
            item_id: item_id.to_string(),
        })
    }

    // ============================================================
    // WITHDRAWALS
    // ============================================================

    /// Move `amount` `spendable -> withdrawal_processing` and open a
    /// request for it. Returns the request number.
    pub fn open_withdrawal(&mut self, amount: Amount) -> Result<u64, LedgerError> {
        check_amount(amount)?;
        let request = self.draft.account().withdrawals_requested();
        self.move_unchecked(
            Pool::Spendable,
            Pool::WithdrawalProcessing,
            amount,
            Operation::WithdrawalRequested.into(),
        )?;
        self.draft.record(Effect::OpenWithdrawal { amount })?;
        Ok(request)
    }

    /// Close the oldest open request of exactly `amount`.
    ///
    /// Returns the entry id of the request, which the settling entry links
    /// to.
    pub fn close_withdrawal(
        &mut self,
        amount: Amount,
        outcome: WithdrawalOutcome,
    ) -> Result<Option<EntryId>, LedgerError> {
        check_amount(amount)?;
        let request = self
            .draft
            .account()
            .withdrawals()
            .iter()
            .find(|&(_, &open)| open == amount)
            .map(|(&request, _)| request)
            .ok_or(LedgerError::WithdrawalNotFound {
                user_id: self.user_id(),
                amount,
            })?;
        let requested = self.request_entry(request);

        match outcome {
            WithdrawalOutcome::Paid => self.debit_unchecked(
                Pool::WithdrawalProcessing,
                amount,
                EntryMeta::new(Operation::WithdrawalPaid).related(requested),
            )?,
            WithdrawalOutcome::Returned => self.move_unchecked(
                Pool::WithdrawalProcessing,
                Pool::Spendable,
                amount,
                EntryMeta::new(Operation::WithdrawalReturned).related(requested),
            )?,
        }
        self.draft.record(Effect::CloseWithdrawal { request })?;
        Ok(requested)
    }

    /// Request entries are written only by `open_withdrawal`, one per
    /// request, so request `n` is the n-th of them.
    fn request_entry(&self, request: u64) -> Option<EntryId> {
        let index = usize::try_from(request).ok()?;
        self.history()
            .iter()
            .filter(|e| e.operation == Operation::WithdrawalRequested)
            .nth(index)
            .map(|e| e.entry_id)
    }

    // ============================================================
    // COUNTERS / REFERRAL STATE
    // ============================================================

    pub fn count_bought(&mut self) -> Result<(), LedgerError> {
        self.draft.record(Effect::CountBought)
    }

    pub fn count_sold(&mut self, item_id: &str) -> Result<(), LedgerError> {
        self.draft.record(Effect::CountSold {
            item_id: item_id.to_string(),
        })
    }

    pub fn add_referral(&mut self, user_id: UserId) -> Result<(), LedgerError> {
        self.draft.record(Effect::AddReferral { user_id })
    }

    pub fn add_referral_earnings(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.draft.record(Effect::AddReferralEarnings { amount })
    }

    /// Entry with no pool change
    pub fn memo(&mut self, amount: Amount, meta: EntryMeta) {
        self.push(EntryKind::Memo, amount, Vec::new(), meta);
    }

    // ============================================================
    // INTERNALS
    // ============================================================

    fn credit_unchecked(&mut self, pool: Pool, amount: Amount, meta: EntryMeta) -> Result<(), LedgerError> {
        let before = self.balance(pool);
        self.draft.record(Effect::Credit { pool, amount })?;
        let change = PoolChange {
            pool,
            before,
            after: self.balance(pool),
        };
        self.push(EntryKind::Credit, amount, vec![change], meta);
        Ok(())
    }

    fn debit_unchecked(&mut self, pool: Pool, amount: Amount, meta: EntryMeta) -> Result<(), LedgerError> {
        let before = self.balance(pool);
        self.draft.record(Effect::Debit { pool, amount })?;
        let change = PoolChange {
            pool,
            before,
            after: self.balance(pool),
        };
        self.push(EntryKind::Debit, amount, vec![change], meta);
        Ok(())
    }

    fn move_unchecked(
        &mut self,
        from: Pool,
        to: Pool,
        amount: Amount,
        meta: EntryMeta,
    ) -> Result<(), LedgerError> {
        let (from_before, to_before) = (self.balance(from), self.balance(to));
        self.draft.record(Effect::Move { from, to, amount })?;
        let changes = vec![
            PoolChange {
                pool: from,
                before: from_before,
                after: self.balance(from),
            },
            PoolChange {
                pool: to,
                before: to_before,
                after: self.balance(to),
            },
        ];
        self.push(EntryKind::Move, amount, changes, meta);
        Ok(())
    }

    fn push(&mut self, kind: EntryKind, amount: Amount, changes: Vec<PoolChange>, meta: EntryMeta) {
        self.draft.push_entry(DraftEntry {
            kind,
            operation: meta.operation,
            amount,
            changes,
            related_entry_id: meta.related_entry_id,
            item_id: meta.item_id,
            counterparty: meta.counterparty,
        });
    }
}

#[inline]
fn check_amount(amount: Amount) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

// ============================================================
// BALANCE ENGINE
// ============================================================

pub struct BalanceEngine {
    store: Arc<LedgerStore>,
}

impl BalanceEngine {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    /// Run a composite unit of work as one atomic commit
    pub async fn post<F>(
        &self,
        user_id: UserId,
        idempotency: Option<&Idempotency>,
        unit: F,
    ) -> Result<Receipt, LedgerError>
    where
        F: FnOnce(&mut Posting<'_, '_>) -> Result<(), LedgerError>,
    {
        self.store
            .apply(user_id, idempotency, |draft| {
                let mut posting = Posting::new(draft);
                unit(&mut posting)
            })
            .await
    }

    pub async fn credit(
        &self,
        user_id: UserId,
        pool: Pool,
        amount: Amount,
        idempotency_key: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        debug!(user_id, %pool, amount, "credit");
        let idempotency = primitive_key(idempotency_key, EntryKind::Credit, pool, amount);
        self.post(user_id, idempotency.as_ref(), |p| {
            p.credit(pool, amount, Operation::Primitive.into())
        })
        .await
    }

    pub async fn debit(
        &self,
        user_id: UserId,
        pool: Pool,
        amount: Amount,
        idempotency_key: Option<&str>,
    ) -> Result<Receipt, LedgerError> {
        debug!(user_id, %pool, amount, "debit");
        let idempotency = primitive_key(idempotency_key, EntryKind::Debit, pool, amount);
        self.post(user_id, idempotency.as_ref(), |p| {
            p.debit(pool, amount, Operation::Primitive.into())
        })
        .await
    }
}

fn primitive_key(key: Option<&str>, kind: EntryKind, pool: Pool, amount: Amount) -> Option<Idempotency> {
    key.map(|key| {
        Idempotency::new(
            key,
            RequestFingerprint::new(Operation::Primitive)
                .amount(amount)
                .pool(pool)
                .detail(kind.as_str()),
        )
    })
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;

    async fn engine_with(user_id: UserId, spendable: Amount) -> BalanceEngine {
        let store = Arc::new(LedgerStore::in_memory(StoreConfig::new("unused")));
        store.create_if_absent(user_id, None).await.unwrap();
        let engine = BalanceEngine::new(store);
        if spendable > 0 {
            engine
                .credit(user_id, Pool::Spendable, spendable, None)
                .await
                .unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn test_credit_writes_one_entry() {
        let engine = engine_with(1, 0).await;
        let receipt = engine.credit(1, Pool::Topup, 25, None).await.unwrap();

        assert_eq!(receipt.entries.len(), 1);
        let entry = &receipt.entries[0];
        assert_eq!(entry.kind, EntryKind::Credit);
        assert_eq!(entry.amount, 25);
        assert_eq!(entry.changes[0].before, 0);
        assert_eq!(entry.changes[0].after, 25);
        assert_eq!(receipt.balances.topup(), 25);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let engine = engine_with(1, 10).await;
        assert_eq!(
            engine.credit(1, Pool::Spendable, 0, None).await.unwrap_err(),
            LedgerError::InvalidAmount
        );
        assert_eq!(
            engine.debit(1, Pool::Spendable, 0, None).await.unwrap_err(),
            LedgerError::InvalidAmount
        );
    }

    #[tokio::test]
    async fn test_debit_insufficient_is_untouched() {
        let engine = engine_with(1, 10).await;
        let err = engine.debit(1, Pool::Spendable, 11, None).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                pool: Pool::Spendable,
                available: 10,
                requested: 11
            }
        );
        assert_eq!(engine.store().get(1).unwrap().balance(Pool::Spendable), 10);
        assert_eq!(engine.store().entries(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_withdrawal_request_is_single_move() {
        let engine = engine_with(1, 100).await;
        let receipt = engine
            .post(1, None, |p| p.open_withdrawal(40).map(|_| ()))
            .await
            .unwrap();
        let entry = &receipt.entries[0];
        assert_eq!(entry.kind, EntryKind::Move);
        assert_eq!(entry.operation, Operation::WithdrawalRequested);
        assert_eq!(entry.net_effect(), 0);
        assert_eq!(receipt.balances.spendable(), 60);
        assert_eq!(receipt.balances.withdrawal_processing(), 40);
    }

    #[tokio::test]
    async fn test_equal_withdrawals_close_in_request_order() {
        let engine = engine_with(1, 100).await;
        let mut requests = Vec::new();
        for _ in 0..2 {
            let receipt = engine
                .post(1, None, |p| p.open_withdrawal(40).map(|_| ()))
                .await
                .unwrap();
            requests.push(receipt.entries[0].entry_id);
        }

        let mut linked = Vec::new();
        for outcome in [WithdrawalOutcome::Paid, WithdrawalOutcome::Returned] {
            let receipt = engine
                .post(1, None, |p| p.close_withdrawal(40, outcome).map(|_| ()))
                .await
                .unwrap();
            linked.push(receipt.entries[0].related_entry_id.unwrap());
        }
        assert_eq!(linked, requests);

        let account = engine.store().get(1).unwrap();
        assert!(account.withdrawals().is_empty());
        assert_eq!(account.balance(Pool::Spendable), 60);
        assert_eq!(account.balance(Pool::WithdrawalProcessing), 0);
    }

    #[tokio::test]
    async fn test_close_withdrawal_needs_exact_request() {
        let engine = engine_with(1, 100).await;
        for amount in [40, 30] {
            engine
                .post(1, None, |p| p.open_withdrawal(amount).map(|_| ()))
                .await
                .unwrap();
        }

        // 50 fits inside withdrawal_processing but matches no request
        let err = engine
            .post(1, None, |p| p.close_withdrawal(50, WithdrawalOutcome::Paid).map(|_| ()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::WithdrawalNotFound {
                user_id: 1,
                amount: 50
            }
        );
        assert_eq!(engine.store().get(1).unwrap().balance(Pool::WithdrawalProcessing), 70);
    }

    #[tokio::test]
    async fn test_disallowed_transitions() {
        let engine = engine_with(1, 100).await;
        engine.credit(1, Pool::Topup, 10, None).await.unwrap();
        engine
            .post(1, None, |p| p.open_withdrawal(5).map(|_| ()))
            .await
            .unwrap();

        for pool in [Pool::Held, Pool::WithdrawalProcessing] {
            assert!(matches!(
                engine.credit(1, pool, 1, None).await,
                Err(LedgerError::InvalidTransition(_))
            ));
            let err = engine.debit(1, pool, 1, None).await.unwrap_err();
            assert_eq!(err.code(), "INVALID_TRANSITION", "debit from {}", pool);
        }
        assert_eq!(engine.store().get(1).unwrap().balance(Pool::WithdrawalProcessing), 5);
    }

    #[tokio::test]
    async fn test_primitive_key_bound_to_request() {
        let engine = engine_with(1, 0).await;
        engine.credit(1, Pool::Topup, 10, Some("t-1")).await.unwrap();
        let replay = engine.credit(1, Pool::Topup, 10, Some("t-1")).await.unwrap();
        assert!(replay.replayed);

        let err = engine.debit(1, Pool::Topup, 10, Some("t-1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert_eq!(engine.store().get(1).unwrap().balance(Pool::Topup), 10);
    }

    #[tokio::test]
    async fn test_hold_round_trip() {
        let engine = engine_with(1, 100).await;
        engine
            .post(1, None, |p| {
                p.open_hold(
                    "+441",
                    30,
                    HoldKind::PurchaseReserve,
                    EntryMeta::new(Operation::PurchaseReserved).item("+441"),
                )
            })
            .await
            .unwrap();
        let account = engine.store().get(1).unwrap();
        assert_eq!(account.balance(Pool::Held), 30);
        assert_eq!(account.balance(Pool::Spendable), 70);

        // Duplicate hold for the same item
        let err = engine
            .post(1, None, |p| {
                p.open_hold("+441", 5, HoldKind::PurchaseReserve, Operation::PurchaseReserved.into())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateHold { .. }));

        let receipt = engine
            .post(1, None, |p| {
                p.release_hold("+441", Operation::PurchaseCancelled.into())
                    .map(|_| ())
            })
            .await
            .unwrap();
        assert_eq!(receipt.balances.spendable(), 100);
        assert_eq!(receipt.balances.held(), 0);

        let err = engine
            .post(1, None, |p| p.consume_hold("+441", Operation::SaleVoided.into()).map(|_| ()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::HoldNotFound { .. }));
    }

    #[tokio::test]
    async fn test_failed_composite_is_atomic() {
        let engine = engine_with(1, 50).await;
        let err = engine
            .post(1, None, |p| {
                p.debit(Pool::Spendable, 20, Operation::Primitive.into())?;
                p.debit(Pool::Spendable, 40, Operation::Primitive.into())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(engine.store().get(1).unwrap().balance(Pool::Spendable), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_never_overdraw() {
        let engine = Arc::new(engine_with(1, 1_000).await);
        let amount = 70; // floor(1000 / 70) = 14

        let mut handles = Vec::new();
        for _ in 0..32 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.debit(1, Pool::Spendable, amount, None).await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert_eq!(e.code(), "INSUFFICIENT_FUNDS"),
            }
        }
        assert_eq!(ok, 14);
        assert_eq!(engine.store().get(1).unwrap().balance(Pool::Spendable), 20);
    }
}
