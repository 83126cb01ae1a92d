//! Ledger Store
//!
//! Durable persistence of account records and the append-only entry log:
//! a checksummed journal (see [`crate::wal`]) plus atomic snapshots.
//! The only module that touches storage.

pub mod config;
pub mod draft;
pub mod journal;
pub mod ledger_store;
pub mod record;
pub mod recovery;
pub mod snapshot;

// Re-export main types
pub use config::StoreConfig;
pub use draft::Draft;
pub use journal::{FileJournal, JournalSink, MemoryJournal};
pub use ledger_store::{LedgerStore, StoreStats};
pub use record::{AccountRecord, Idempotency, Receipt, RequestFingerprint, StoredReceipt};
pub use recovery::{LedgerRecovery, RecoveryState};
pub use snapshot::{LedgerImage, LedgerSnapshotter, SnapshotMetadata};
