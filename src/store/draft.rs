//! Draft - the mutable copy of an account a unit of work runs against

use crate::account::{Account, Effect};
use crate::error::LedgerError;
use crate::ledger::{DraftEntry, LedgerEntry};

/// A copy of the account plus the effects and entries recorded so far.
///
/// Nothing recorded here is visible until the store commits it.
#[derive(Debug)]
pub struct Draft<'h> {
    account: Account,
    history: &'h [LedgerEntry],
    effects: Vec<Effect>,
    entries: Vec<DraftEntry>,
}

impl<'h> Draft<'h> {
    pub(crate) fn new(account: Account, history: &'h [LedgerEntry]) -> Self {
        Self {
            account,
            history,
            effects: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Current (uncommitted) state
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Committed entries of the account, oldest first
    pub fn history(&self) -> &'h [LedgerEntry] {
        self.history
    }

    /// Apply an effect to the draft and remember it for the journal.
    /// A refused effect is not recorded.
    pub fn record(&mut self, effect: Effect) -> Result<(), LedgerError> {
        self.account.apply(&effect)?;
        self.effects.push(effect);
        Ok(())
    }

    pub fn push_entry(&mut self, entry: DraftEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[DraftEntry] {
        &self.entries
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.entries.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Account, Vec<Effect>, Vec<DraftEntry>) {
        (self.account, self.effects, self.entries)
    }
}
