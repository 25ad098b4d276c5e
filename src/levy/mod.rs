//! Levy Collection Core
//!
//! Period derivation is pure (`period`); recording is transactional
//! (`ledger`) and leans on the store's unique indexes for cross-process
//! correctness.

pub mod ledger;
pub mod period;


pub use ledger::{LevyError, LevyLedger, RecordPaymentRequest};
pub use period::{due_status, period_key, DueStatus};
