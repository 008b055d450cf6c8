//! Append-only journal of usage allocate/deallocate events

use crate::error::{QuotaError, Result};
use crate::ledger::store::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Direction of a usage event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageOperation {
    Allocate,
    Deallocate,
}

impl UsageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allocate => "allocate",
            Self::Deallocate => "deallocate",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "allocate" => Ok(Self::Allocate),
            "deallocate" => Ok(Self::Deallocate),
            other => Err(QuotaError::Corrupt(format!("unknown usage operation: {}", other))),
        }
    }
}

/// One usage event against a quota node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub quota_id: String,
    pub user_id: String,
    /// Caller-supplied identifier of the resource consuming the capacity
    pub resource_id: String,
    /// Always positive; the direction is carried by `operation`
    pub usage_mb: i64,
    pub operation: UsageOperation,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        quota_id: &str,
        user_id: &str,
        resource_id: &str,
        usage_mb: i64,
        operation: UsageOperation,
        reason: &str,
    ) -> Self {
        Self {
            id: format!("usage_{}", Uuid::new_v4().simple()),
            quota_id: quota_id.to_string(),
            user_id: user_id.to_string(),
            resource_id: resource_id.to_string(),
            usage_mb,
            operation,
            reason: reason.to_string(),
            created_at: Utc::now(),
        }
    }
}

pub struct UsageJournal {
    db: SqlitePool,
}

impl UsageJournal {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_usage (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                quota_id TEXT NOT NULL REFERENCES quota_nodes(id),
                user_id TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                usage_mb INTEGER NOT NULL CHECK (usage_mb > 0),
                operation TEXT NOT NULL CHECK (operation IN ('allocate', 'deallocate')),
                reason TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quota_usage_quota ON quota_usage(quota_id)")
            .execute(&self.db)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_quota_usage_resource ON quota_usage(resource_id)",
        )
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Append a record inside the caller's transaction
    pub async fn append(&self, conn: &mut SqliteConnection, record: &UsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quota_usage
                (id, quota_id, user_id, resource_id, usage_mb, operation, reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.quota_id)
        .bind(&record.user_id)
        .bind(&record.resource_id)
        .bind(record.usage_mb)
        .bind(record.operation.as_str())
        .bind(&record.reason)
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Records for one node in commit order
    pub async fn for_node(&self, quota_id: &str) -> Result<Vec<UsageRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, quota_id, user_id, resource_id, usage_mb, operation, reason, created_at
            FROM quota_usage
            WHERE quota_id = ?
            ORDER BY seq
            "#,
        )
        .bind(quota_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &SqliteRow) -> Result<UsageRecord> {
    let operation: String = row.try_get("operation")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(UsageRecord {
        id: row.try_get("id")?,
        quota_id: row.try_get("quota_id")?,
        user_id: row.try_get("user_id")?,
        resource_id: row.try_get("resource_id")?,
        usage_mb: row.try_get("usage_mb")?,
        operation: UsageOperation::parse(&operation)?,
        reason: row.try_get("reason")?,
        created_at: parse_timestamp(&created_at)?,
    })
}
