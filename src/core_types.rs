//! Core types used throughout the ledger
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// User ID - globally unique, immutable after assignment.
///
/// # Usage:
/// - Primary key for ledger accounts
/// - Key of the per-user exclusive section in the store
pub type UserId = u64;

/// Amount in micro-USDT (6 decimal fixed point).
///
/// `1 USDT = 1_000_000`. All pool arithmetic is done on this integer
/// representation; conversion to/from text goes through [`crate::money`].
pub type Amount = u64;

/// Ledger entry ID - monotonic and unique across the whole store
pub type EntryId = u64;

/// Catalog item identifier (sold/bought phone-number account)
pub type ItemId = String;

/// Journal sequence number
pub type SeqNum = u64;
