//! Serialized integration and transactional rollback.

pub mod controller;
pub mod error;
pub mod ledger;

pub use controller::{MergeController, MergeOutcome, MergeState, QueuedMerge};
pub use error::{MergeError, MergeResult};
pub use ledger::{LedgerEntry, MergeLedger, MergeRecord, RollbackRecord};
