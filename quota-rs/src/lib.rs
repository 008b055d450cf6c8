//! quota-rs: Hierarchical capacity ledger
//!
//! Tracks how a bounded quantity of storage (in megabytes) is subdivided
//! across a tree of organization and team quotas.
//!
//! # Features
//!
//! - **Ledger**: quota nodes with `total`, `used` and `allocated` capacity,
//!   materialized paths and soft deletion
//! - **Atomicity**: every capacity change, its usage record and its audit
//!   entry commit in one SQLite transaction
//! - **Concurrency**: mutating operations lock their node before reading it,
//!   so concurrent allocations can never over-commit a parent
//! - **Authorization**: capability checks delegated to an external oracle
//!
//! # Example
//!
//! ```no_run
//! use quota_rs::ledger::QuotaKind;
//! use quota_rs::oracle::{Actor, MemoryOracle};
//! use quota_rs::quota::{CreateRootRequest, QuotaManager};
//! use sqlx::SqlitePool;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = SqlitePool::connect("sqlite://quota.db").await?;
//!     let manager = QuotaManager::new(pool, Arc::new(MemoryOracle::permissive()));
//!     manager.init_db().await?;
//!
//!     let actor = Actor::new("user_1", "org_1");
//!     let root = manager
//!         .create_root(
//!             &actor,
//!             CreateRootRequest {
//!                 name: "Acme".to_string(),
//!                 description: String::new(),
//!                 kind: QuotaKind::Organization,
//!                 total_mb: 10_000,
//!                 team_id: None,
//!             },
//!         )
//!         .await?;
//!
//!     println!("{} has {} MB available", root.id, root.available_mb());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`ledger`]: Quota node types and the SQLite ledger store
//! - [`journal`]: Usage journal and audit trail
//! - [`oracle`]: Authorization oracle trait and implementations
//! - [`quota`]: The quota manager operations

pub mod config;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod oracle;
pub mod quota;

// Re-export commonly used types
pub use config::Config;
pub use error::{QuotaError, Result};
pub use quota::QuotaManager;
