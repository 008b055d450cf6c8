use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QuotaError, Result};

/// Kind of scope a quota node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaKind {
    Organization,
    Team,
}

impl QuotaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Team => "team",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "organization" => Ok(Self::Organization),
            "team" => Ok(Self::Team),
            other => Err(QuotaError::Validation(format!(
                "invalid quota type: {}",
                other
            ))),
        }
    }
}

/// Lifecycle state of a quota node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    Active,
    Suspended,
    /// Terminal. Deleted nodes are invisible to every ledger lookup.
    Deleted,
}

impl QuotaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            other => Err(QuotaError::Corrupt(format!("unknown quota status: {}", other))),
        }
    }
}

/// A node in the allocation tree
///
/// Capacity is tracked in whole megabytes. `allocated_mb` is the capacity
/// handed to direct children; `used_mb` is consumed by tracked resources on
/// this node itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaNode {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: QuotaKind,

    pub total_mb: i64,
    pub used_mb: i64,
    pub allocated_mb: i64,

    /// None only for roots
    pub parent_id: Option<String>,
    pub level: i32,
    /// Root-to-node id chain, e.g. `/quota_a/quota_b`
    pub path: String,

    pub owner_id: String,
    pub organization_id: String,
    pub team_id: Option<String>,

    pub status: QuotaStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl QuotaNode {
    /// Generate a fresh node id
    pub fn new_id() -> String {
        let uuid = Uuid::new_v4().simple().to_string();
        format!("quota_{}", &uuid[..16])
    }

    /// Build an active root node
    #[allow(clippy::too_many_arguments)]
    pub fn root(
        id: String,
        name: String,
        description: String,
        kind: QuotaKind,
        total_mb: i64,
        owner_id: String,
        organization_id: String,
        team_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let path = format!("/{}", id);

        QuotaNode {
            id,
            name,
            description,
            kind,
            total_mb,
            used_mb: 0,
            allocated_mb: 0,
            parent_id: None,
            level: 0,
            path,
            owner_id,
            organization_id,
            team_id,
            status: QuotaStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Build an active child of `self` holding `total_mb`
    ///
    /// Owner and organization always come from the parent. A team child takes
    /// `target_id` as its team; an organization child keeps the parent's team.
    pub fn child(
        &self,
        id: String,
        name: String,
        description: String,
        kind: QuotaKind,
        total_mb: i64,
        target_id: &str,
    ) -> Self {
        let now = Utc::now();
        let team_id = match kind {
            QuotaKind::Team => Some(target_id.to_string()),
            QuotaKind::Organization => self.team_id.clone(),
        };
        let path = format!("{}/{}", self.path, id);

        QuotaNode {
            id,
            name,
            description,
            kind,
            total_mb,
            used_mb: 0,
            allocated_mb: 0,
            parent_id: Some(self.id.clone()),
            level: self.level + 1,
            path,
            owner_id: self.owner_id.clone(),
            organization_id: self.organization_id.clone(),
            team_id,
            status: QuotaStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Headroom left for new children or usage
    pub fn available_mb(&self) -> i64 {
        self.total_mb - self.used_mb - self.allocated_mb
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Ids of every ancestor, root first, read off the materialized path
    pub fn ancestor_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.path.split('/').filter(|s| !s.is_empty()).collect();
        ids.pop();
        ids
    }

    /// Check that `kind`/`target_id` may be carved out of this node
    ///
    /// Organization nodes may allocate to any kind. Team nodes may only
    /// allocate to team nodes of their own team.
    pub fn check_child_allowed(&self, kind: QuotaKind, target_id: &str) -> Result<()> {
        match (self.kind, kind) {
            (QuotaKind::Organization, _) => Ok(()),
            (QuotaKind::Team, QuotaKind::Team) => {
                if self.team_id.as_deref() == Some(target_id) {
                    Ok(())
                } else {
                    Err(QuotaError::HierarchyViolation(
                        "team quota can only allocate to the same team".to_string(),
                    ))
                }
            }
            (QuotaKind::Team, QuotaKind::Organization) => {
                Err(QuotaError::HierarchyViolation(format!(
                    "{} quota cannot allocate to {} quota",
                    self.kind.as_str(),
                    kind.as_str()
                )))
            }
        }
    }
}
