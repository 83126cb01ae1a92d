//! Ledger observers
//!
//! Hooks for the bot layer (user notifications). Observers run after the
//! commit is durable; their failures are logged and never affect the ledger.

use async_trait::async_trait;

use crate::balance::Pool;
use crate::core_types::{Amount, EntryId, ItemId, UserId};

/// Committed events worth telling someone about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    SaleSettled {
        seller: UserId,
        item_id: ItemId,
        amount: Amount,
        entry_id: EntryId,
    },
    SaleVoided {
        seller: UserId,
        item_id: ItemId,
        amount: Amount,
    },
    PurchaseSettled {
        buyer: UserId,
        item_id: ItemId,
        amount: Amount,
        entry_id: EntryId,
    },
    TopupCredited {
        user_id: UserId,
        pool: Pool,
        amount: Amount,
    },
    ReferralCredited {
        referrer_id: UserId,
        referred_user_id: UserId,
        amount: Amount,
        entry_id: EntryId,
    },
    ReferralLinked {
        referrer_id: UserId,
        referred_user_id: UserId,
        bonus: Amount,
    },
    WithdrawalRequested {
        user_id: UserId,
        amount: Amount,
        method: Option<String>,
    },
    WithdrawalPaid {
        user_id: UserId,
        amount: Amount,
    },
    WithdrawalReturned {
        user_id: UserId,
        amount: Amount,
    },
}

/// Receives committed ledger events
#[async_trait]
pub trait LedgerObserver: Send + Sync {
    /// Observer name for logging
    fn name(&self) -> &'static str;

    async fn on_event(&self, event: &LedgerEvent) -> anyhow::Result<()>;
}

/// Recording observer for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<LedgerEvent>>,
        fail: bool,
    }

    impl RecordingObserver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Records events but reports every delivery as failed
        pub fn failing() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn events(&self) -> Vec<LedgerEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LedgerObserver for RecordingObserver {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn on_event(&self, event: &LedgerEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                anyhow::bail!("bot transport unavailable");
            }
            Ok(())
        }
    }
}
