/// Ledger of quota nodes
///
/// This module owns the durable quota tree:
/// - Node types and the capacity/hierarchy rules that apply to them
/// - The SQLite store with transactional, row-locking access

pub mod store;
pub mod types;

pub use store::{open_pool, LedgerStore};
pub use types::{QuotaKind, QuotaNode, QuotaStatus};
