//! BGT Ledger - operator entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌───────────┐    ┌──────────┐
//! │  Config  │───▶│ Recovery │───▶│ Reconcile │───▶│ Summary  │
//! │  (YAML)  │    │(Snap+WAL)│    │(Referrals)│    │ (stdout) │
//! └──────────┘    └──────────┘    └───────────┘    └──────────┘
//! ```
//!
//! Flags:
//! - `--env <name>` / `-e <name>`: load `config/<name>.yaml` (default `dev`)
//! - `--snapshot`: write a snapshot after reconciliation
//! - `--export <path>`: dump every ledger entry as CSV

use anyhow::Context;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use bgt_ledger::config::AppConfig;
use bgt_ledger::ledger::LedgerCsvWriter;
use bgt_ledger::money::format_total;
use bgt_ledger::{LedgerStore, TransactionCoordinator};

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn use_snapshot_mode() -> bool {
    std::env::args().any(|a| a == "--snapshot")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = bgt_ledger::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        git_hash = env!("GIT_HASH"),
        data_dir = %app_config.store.data_dir.display(),
        "Starting BGT ledger"
    );

    let store = Arc::new(
        LedgerStore::open(app_config.store.clone()).context("Failed to open ledger store")?,
    );
    let coordinator =
        TransactionCoordinator::new(Arc::clone(&store), &app_config.referral, app_config.policy()?)
            .context("Failed to build coordinator")?;

    let report = coordinator.reconcile().await.context("Reconciliation failed")?;

    if use_snapshot_mode() {
        let path = store.snapshot().await.context("Snapshot failed")?;
        tracing::info!(path = %path.display(), "Snapshot written");
    }

    if let Some(path) = get_arg(&["--export"]) {
        let file = File::create(&path).with_context(|| format!("Failed to create {}", path))?;
        let mut writer = LedgerCsvWriter::new(BufWriter::new(file))?;
        for entry in store.all_entries() {
            writer.write_entry(&entry)?;
        }
        writer.flush()?;
        tracing::info!(path = %path, entries = writer.entry_count(), "Ledger exported");
    }

    let summary = coordinator.summary();
    let stats = store.stats().await;

    println!("\n=== BGT Ledger ===");
    println!("Accounts:              {}", summary.accounts);
    println!("Entries:               {}", stats.entries);
    println!("Journal next seq:      {}", stats.next_seq);
    println!("Open holds:            {}", summary.open_holds);
    println!("\n--- Funds (USDT) ---");
    println!("spendable:             {}", format_total(summary.spendable));
    println!("held:                  {}", format_total(summary.held));
    println!("topup:                 {}", format_total(summary.topup));
    println!(
        "withdrawal_processing: {}",
        format_total(summary.withdrawal_processing)
    );
    println!("total:                 {}", format_total(summary.total()));
    println!(
        "referral earnings:     {}",
        format_total(summary.referral_earnings)
    );
    println!("\n--- Reconciliation ---");
    println!("links repaired:        {}", report.links_repaired);
    println!(
        "commissions repaired:  {} ({})",
        report.commissions_repaired,
        format_total(report.commission_amount)
    );
    println!("deferred:              {}", report.deferred);
    for warning in &report.warnings {
        println!("warning:               {}", warning);
    }

    Ok(())
}
