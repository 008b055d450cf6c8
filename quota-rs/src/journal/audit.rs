//! Append-only audit trail of administrative quota actions

use crate::error::Result;
use crate::ledger::store::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Action tags written by the quota manager
pub mod actions {
    pub const CREATE: &str = "create";
    pub const ALLOCATE: &str = "allocate";
    pub const RELEASE: &str = "release";
    pub const USAGE_ALLOCATE: &str = "usage_allocate";
    pub const USAGE_DEALLOCATE: &str = "usage_deallocate";
    pub const GRANT_PERMISSION: &str = "grant_permission";
}

/// One administrative action against a quota node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub quota_id: String,
    /// Free-form tag, see [`actions`]
    pub action: String,
    pub actor_id: String,
    pub target_actor_id: Option<String>,
    pub details: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(quota_id: &str, action: &str, actor_id: &str) -> Self {
        Self {
            id: format!("audit_{}", Uuid::new_v4().simple()),
            quota_id: quota_id.to_string(),
            action: action.to_string(),
            actor_id: actor_id.to_string(),
            target_actor_id: None,
            details: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target_actor_id: &str) -> Self {
        self.target_actor_id = Some(target_actor_id.to_string());
        self
    }

    /// Attach a detail payload. Non-object values are ignored.
    pub fn with_details(mut self, details: Value) -> Self {
        if let Value::Object(map) = details {
            self.details = map;
        }
        self
    }
}

pub struct AuditTrail {
    db: SqlitePool,
}

impl AuditTrail {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_audit_logs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                quota_id TEXT NOT NULL REFERENCES quota_nodes(id),
                action_type TEXT NOT NULL,
                actor_user_id TEXT NOT NULL,
                target_user_id TEXT,
                details TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_quota_audit_quota ON quota_audit_logs(quota_id)",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_quota_audit_actor ON quota_audit_logs(actor_user_id)",
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Append an entry inside the caller's transaction
    pub async fn append(&self, conn: &mut SqliteConnection, entry: &AuditEntry) -> Result<()> {
        let details = serde_json::to_string(&entry.details)?;

        sqlx::query(
            r#"
            INSERT INTO quota_audit_logs
                (id, quota_id, action_type, actor_user_id, target_user_id, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.quota_id)
        .bind(&entry.action)
        .bind(&entry.actor_id)
        .bind(&entry.target_actor_id)
        .bind(details)
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Entries for one node in commit order
    pub async fn for_node(&self, quota_id: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, quota_id, action_type, actor_user_id, target_user_id, details, created_at
            FROM quota_audit_logs
            WHERE quota_id = ?
            ORDER BY seq
            "#,
        )
        .bind(quota_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<AuditEntry> {
    let details: String = row.try_get("details")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        quota_id: row.try_get("quota_id")?,
        action: row.try_get("action_type")?,
        actor_id: row.try_get("actor_user_id")?,
        target_actor_id: row.try_get("target_user_id")?,
        details: serde_json::from_str(&details)?,
        created_at: parse_timestamp(&created_at)?,
    })
}
