//! SQLite-backed ledger of quota nodes
//!
//! Every capacity mutation runs inside a caller-owned transaction. The first
//! statement of a mutating transaction is always [`LedgerStore::lock_node`],
//! which writes to the target row and so takes SQLite's write lock before
//! anything is read. A second writer blocks on the busy timeout until the
//! first commits or rolls back, then reads the committed row.

use crate::config::StorageConfig;
use crate::error::{QuotaError, Result};
use crate::ledger::types::{QuotaKind, QuotaNode, QuotaStatus};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const NODE_COLUMNS: &str = "id, name, description, kind, total_mb, used_mb, allocated_mb, \
     parent_id, level, path, owner_id, organization_id, team_id, \
     status, created_at, updated_at, deleted_at";

/// Open a connection pool for the ledger database
pub async fn open_pool(config: &StorageConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Durable table of quota nodes
#[derive(Clone)]
pub struct LedgerStore {
    db: SqlitePool,
}

impl LedgerStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Initialize database tables
    pub async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_nodes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                kind TEXT NOT NULL CHECK (kind IN ('organization', 'team')),
                total_mb INTEGER NOT NULL CHECK (total_mb >= 0),
                used_mb INTEGER NOT NULL DEFAULT 0 CHECK (used_mb >= 0),
                allocated_mb INTEGER NOT NULL DEFAULT 0 CHECK (allocated_mb >= 0),
                parent_id TEXT REFERENCES quota_nodes(id),
                level INTEGER NOT NULL DEFAULT 0 CHECK (level >= 0),
                path TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                team_id TEXT,
                status TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'suspended', 'deleted')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                CONSTRAINT quota_balance_check CHECK (used_mb + allocated_mb <= total_mb)
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quota_nodes_parent ON quota_nodes(parent_id)")
            .execute(&self.db)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_quota_nodes_organization ON quota_nodes(organization_id)",
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quota_nodes_path ON quota_nodes(path)")
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Start a transaction for one ledger operation
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.db.begin().await?)
    }

    /// Point lookup of an active or suspended node
    pub async fn get_node(&self, id: &str) -> Result<QuotaNode> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM quota_nodes WHERE id = ? AND status != ?",
            NODE_COLUMNS
        ))
        .bind(id)
        .bind(QuotaStatus::Deleted.as_str())
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => row_to_node(&row),
            None => Err(QuotaError::NotFound(id.to_string())),
        }
    }

    /// Lock a node for the rest of the transaction and read it
    ///
    /// Must be the first statement of the transaction so the read happens
    /// under the write lock.
    pub async fn lock_node(&self, conn: &mut SqliteConnection, id: &str) -> Result<QuotaNode> {
        let locked = sqlx::query("UPDATE quota_nodes SET status = status WHERE id = ? AND status != ?")
            .bind(id)
            .bind(QuotaStatus::Deleted.as_str())
            .execute(&mut *conn)
            .await?;

        if locked.rows_affected() == 0 {
            return Err(QuotaError::NotFound(id.to_string()));
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM quota_nodes WHERE id = ?",
            NODE_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

        debug!(quota_id = %id, "Locked quota node");
        row_to_node(&row)
    }

    pub async fn insert_node(&self, conn: &mut SqliteConnection, node: &QuotaNode) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO quota_nodes ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            NODE_COLUMNS
        ))
        .bind(&node.id)
        .bind(&node.name)
        .bind(&node.description)
        .bind(node.kind.as_str())
        .bind(node.total_mb)
        .bind(node.used_mb)
        .bind(node.allocated_mb)
        .bind(&node.parent_id)
        .bind(node.level)
        .bind(&node.path)
        .bind(&node.owner_id)
        .bind(&node.organization_id)
        .bind(&node.team_id)
        .bind(node.status.as_str())
        .bind(node.created_at.to_rfc3339())
        .bind(node.updated_at.to_rfc3339())
        .bind(node.deleted_at.map(|d| d.to_rfc3339()))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Add `delta_mb` (may be negative) to a node's `allocated_mb`
    pub async fn adjust_allocated(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        delta_mb: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE quota_nodes SET allocated_mb = allocated_mb + ?, updated_at = ?
            WHERE id = ? AND status != ?
            "#,
        )
        .bind(delta_mb)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(QuotaStatus::Deleted.as_str())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QuotaError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Add `delta_mb` (may be negative) to a node's `used_mb`
    pub async fn adjust_used(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        delta_mb: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE quota_nodes SET used_mb = used_mb + ?, updated_at = ?
            WHERE id = ? AND status != ?
            "#,
        )
        .bind(delta_mb)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(QuotaStatus::Deleted.as_str())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QuotaError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Soft-delete a node. Deleted rows are kept for the audit trail.
    pub async fn mark_deleted(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE quota_nodes SET status = ?, deleted_at = ?, updated_at = ?
            WHERE id = ? AND status != ?
            "#,
        )
        .bind(QuotaStatus::Deleted.as_str())
        .bind(at.to_rfc3339())
        .bind(at.to_rfc3339())
        .bind(id)
        .bind(QuotaStatus::Deleted.as_str())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QuotaError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Direct children of a node that still hold capacity
    pub async fn active_children(&self, parent_id: &str) -> Result<Vec<QuotaNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM quota_nodes WHERE parent_id = ? AND status != ? ORDER BY created_at, id",
            NODE_COLUMNS
        ))
        .bind(parent_id)
        .bind(QuotaStatus::Deleted.as_str())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_node).collect()
    }

    /// Every live descendant of `node`, shallowest first
    pub async fn subtree(&self, node: &QuotaNode) -> Result<Vec<QuotaNode>> {
        // substr rather than LIKE: ids contain '_', which LIKE treats as a wildcard
        let prefix = format!("{}/", node.path);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM quota_nodes \
             WHERE substr(path, 1, length(?)) = ? AND status != ? \
             ORDER BY level, created_at, id",
            NODE_COLUMNS
        ))
        .bind(&prefix)
        .bind(&prefix)
        .bind(QuotaStatus::Deleted.as_str())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(row_to_node).collect()
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| QuotaError::Corrupt(format!("bad timestamp {:?}: {}", value, e)))
}

fn row_to_node(row: &SqliteRow) -> Result<QuotaNode> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let deleted_at: Option<String> = row.try_get("deleted_at")?;

    Ok(QuotaNode {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: QuotaKind::parse(&kind).map_err(|e| QuotaError::Corrupt(e.to_string()))?,
        total_mb: row.try_get("total_mb")?,
        used_mb: row.try_get("used_mb")?,
        allocated_mb: row.try_get("allocated_mb")?,
        parent_id: row.try_get("parent_id")?,
        level: row.try_get("level")?,
        path: row.try_get("path")?,
        owner_id: row.try_get("owner_id")?,
        organization_id: row.try_get("organization_id")?,
        team_id: row.try_get("team_id")?,
        status: QuotaStatus::parse(&status)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
    })
}
