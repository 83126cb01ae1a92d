//! Crate-level properties: conservation under a mixed workload, recovery
//! from snapshot + journal, torn-tail truncation and restart reconciliation.

use rust_decimal::Decimal;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use bgt_ledger::transaction::TopupPolicy;
use bgt_ledger::{
    Account, EntryMeta, Idempotency, LedgerPolicy, LedgerStore, Operation, Pool, ReferralConfig,
    RequestFingerprint, StoreConfig, TransactionCoordinator,
};

const USDT: u64 = 1_000_000;

fn referral() -> ReferralConfig {
    ReferralConfig {
        rate: Decimal::from_str("0.05").unwrap(),
        signup_bonus: Decimal::from_str("0.1").unwrap(),
    }
}

fn policy() -> LedgerPolicy {
    LedgerPolicy {
        topup: TopupPolicy::CreditSpendable,
        ..LedgerPolicy::default()
    }
}

fn coordinator(store: &Arc<LedgerStore>) -> TransactionCoordinator {
    TransactionCoordinator::new(Arc::clone(store), &referral(), policy()).unwrap()
}

fn temp_config(name: &str) -> StoreConfig {
    let dir = format!("target/test_{}_{}", name, std::process::id());
    let _ = std::fs::remove_dir_all(&dir);
    let mut cfg = StoreConfig::new(&dir);
    cfg.snapshot_event_threshold = 5;
    cfg
}

fn cleanup(cfg: &StoreConfig) {
    let _ = std::fs::remove_dir_all(&cfg.data_dir);
}

fn sorted_accounts(store: &LedgerStore) -> Vec<Account> {
    let mut accounts = store.accounts();
    accounts.sort_by_key(|a| a.user_id());
    accounts
}

fn assert_invariants(store: &LedgerStore) {
    let mut total: u128 = 0;
    for account in store.accounts() {
        assert_eq!(
            account.balance(Pool::Held) as u128,
            account.open_hold_total(),
            "held diverged from open holds for user {}",
            account.user_id()
        );
        assert_eq!(
            account.balance(Pool::WithdrawalProcessing) as u128,
            account.open_withdrawal_total(),
            "withdrawal_processing diverged from open requests for user {}",
            account.user_id()
        );
        total += account.pools().total();
    }
    let net: i128 = store.all_entries().iter().map(|e| e.net_effect()).sum();
    assert_eq!(total as i128, net);
}

/// Runs a fixed mix of operations; returns the number that committed
async fn workload(c: &TransactionCoordinator) -> usize {
    c.open_account(1, None).await.unwrap();
    c.open_account(2, Some(1)).await.unwrap();
    c.open_account(3, Some(2)).await.unwrap();

    // Deterministic LCG keeps the sequence reproducible
    let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
    let mut committed = 0;
    for i in 0..120u64 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let user = 1 + (seed >> 33) % 3;
        let amount = (1 + (seed >> 40) % 50) * USDT / 2;
        let key = format!("op-{}", i);
        let item = format!("item-{}", i % 7);
        let result = match (seed >> 20) % 8 {
            0 => c.topup(user, amount, &key).await.map(|_| ()),
            1 => c.record_sale(user, &item, amount, &key).await.map(|_| ()),
            2 => c.confirm_sale(user, &item, &key).await.map(|_| ()),
            3 => c.void_sale(user, &item, &key).await.map(|_| ()),
            4 => c.record_purchase(user, &item, amount, &key).await.map(|_| ()),
            5 => c.reserve_purchase(user, &item, amount, &key).await.map(|_| ()),
            6 => c.request_withdrawal(user, amount, None, &key).await.map(|_| ()),
            7 if i % 2 == 0 => c.fail_withdrawal(user, amount, &key).await.map(|_| ()),
            _ => c.confirm_withdrawal(user, amount, &key).await.map(|_| ()),
        };
        if result.is_ok() {
            committed += 1;
        }
        assert_invariants(c.store());
    }
    committed
}

#[tokio::test]
async fn conservation_holds_across_mixed_workload() {
    let store = Arc::new(LedgerStore::in_memory(StoreConfig::new("unused")));
    let c = coordinator(&store);
    let committed = workload(&c).await;
    assert!(committed > 0);
    assert_invariants(&store);
}

#[tokio::test]
async fn recovery_reproduces_balances_entries_and_receipts() {
    let cfg = temp_config("ledger_recovery_roundtrip");
    let (before_accounts, before_entries) = {
        let store = Arc::new(LedgerStore::open(cfg.clone()).unwrap());
        let c = coordinator(&store);
        workload(&c).await;
        (sorted_accounts(&store), store.all_entries())
    };

    let store = Arc::new(LedgerStore::open(cfg.clone()).unwrap());
    assert_eq!(sorted_accounts(&store), before_accounts);
    assert_eq!(store.all_entries(), before_entries);
    assert_invariants(&store);

    // A retried top-up after restart is answered from its receipt
    let c = coordinator(&store);
    c.topup(1, USDT, "retry-after-restart").await.unwrap();
    let replay = c.topup(1, USDT, "retry-after-restart").await.unwrap();
    assert!(replay.replayed);

    drop(c);
    drop(store);
    let store = LedgerStore::open(cfg.clone()).unwrap();
    let receipt = store.receipt(1, "retry-after-restart").unwrap();
    assert!(receipt.replayed);
    assert_eq!(receipt.entries.len(), 1);

    // The request behind the key survives the restart too
    let c = coordinator(&Arc::new(store));
    assert!(c.topup(1, USDT, "retry-after-restart").await.unwrap().replayed);
    assert!(matches!(
        c.topup(1, 2 * USDT, "retry-after-restart").await,
        Err(bgt_ledger::LedgerError::Conflict(_))
    ));

    cleanup(&cfg);
}

#[tokio::test]
async fn torn_journal_tail_is_truncated() {
    let mut cfg = temp_config("ledger_torn_tail");
    cfg.snapshot_event_threshold = 0;
    {
        let store = Arc::new(LedgerStore::open(cfg.clone()).unwrap());
        let c = coordinator(&store);
        c.open_account(1, None).await.unwrap();
        c.topup(1, 10 * USDT, "top-1").await.unwrap();
    }

    // Simulate a crash mid-append
    let mut wal = OpenOptions::new().append(true).open(cfg.wal_file()).unwrap();
    wal.write_all(&[0xAB; 10]).unwrap();
    drop(wal);

    {
        let store = Arc::new(LedgerStore::open(cfg.clone()).unwrap());
        assert_eq!(store.get(1).unwrap().balance(Pool::Spendable), 10 * USDT);
        let c = coordinator(&store);
        c.topup(1, 5 * USDT, "top-2").await.unwrap();
    }

    let store = LedgerStore::open(cfg.clone()).unwrap();
    assert_eq!(store.get(1).unwrap().balance(Pool::Spendable), 15 * USDT);
    assert_eq!(store.entries(1).unwrap().len(), 2);

    cleanup(&cfg);
}

#[tokio::test]
async fn restart_reconciliation_pays_missing_commission_once() {
    let cfg = temp_config("ledger_restart_reconcile");
    {
        let store = Arc::new(LedgerStore::open(cfg.clone()).unwrap());
        let c = coordinator(&store);
        c.open_account(1, None).await.unwrap();
        c.open_account(2, Some(1)).await.unwrap();
        c.topup(2, 20 * USDT, "top-1").await.unwrap();

        // Purchase committed without its commission, as if the process died
        let purchase = Idempotency::new(
            "buy-1",
            RequestFingerprint::new(Operation::Purchase)
                .amount(20 * USDT)
                .item("acc-1"),
        );
        c.engine()
            .post(2, Some(&purchase), |p| {
                p.debit(
                    Pool::Spendable,
                    20 * USDT,
                    EntryMeta::new(Operation::Purchase).item("acc-1"),
                )?;
                p.count_bought()
            })
            .await
            .unwrap();
    }

    {
        let store = Arc::new(LedgerStore::open(cfg.clone()).unwrap());
        let c = coordinator(&store);
        let report = c.reconcile().await.unwrap();
        assert_eq!(report.commissions_repaired, 1);
        assert_eq!(report.commission_amount, USDT as u128);
        // Sign-up bonus 0.1 plus 5% of 20
        assert_eq!(store.get(1).unwrap().referral_earnings(), 1_100_000);
    }

    let store = Arc::new(LedgerStore::open(cfg.clone()).unwrap());
    let c = coordinator(&store);
    assert!(c.reconcile().await.unwrap().is_clean());
    assert_eq!(store.get(1).unwrap().referral_earnings(), 1_100_000);

    cleanup(&cfg);
}
