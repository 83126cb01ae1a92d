use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::money;
use crate::referral::ReferralConfig;
use crate::store::StoreConfig;
use crate::transaction::{LedgerPolicy, PurchasePolicy, TopupPolicy, WithdrawalConfig, WithdrawalPolicy};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// `hourly`, `daily`, anything else never rotates
    pub rotation: String,
    #[serde(default)]
    pub store: StoreConfig,
    pub referral: ReferralConfig,
    #[serde(default)]
    pub topup: TopupPolicy,
    #[serde(default)]
    pub purchase: PurchasePolicy,
    #[serde(default)]
    pub withdrawal: WithdrawalConfig,
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> anyhow::Result<Self> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        money::validate_rate(config.referral.rate).context("Invalid referral rate")?;
        config.policy()?;
        Ok(config)
    }

    /// Routing policies in ledger units
    pub fn policy(&self) -> anyhow::Result<LedgerPolicy> {
        let withdrawal = WithdrawalPolicy::from_config(&self.withdrawal)
            .context("Invalid withdrawal minimums")?;
        Ok(LedgerPolicy {
            topup: self.topup,
            purchase: self.purchase,
            withdrawal,
        })
    }
}
