//! Append-only logs written alongside ledger mutations
//!
//! Both journals only append inside the transaction of the mutation they
//! document, so a rolled-back operation leaves no trace in either.

pub mod audit;
pub mod usage;

pub use audit::{actions, AuditEntry, AuditTrail};
pub use usage::{UsageJournal, UsageOperation, UsageRecord};
