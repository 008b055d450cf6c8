use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};
use crate::ledger::{QuotaKind, QuotaNode};
use crate::oracle::Capability;

/// Request to create a root quota
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRootRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: QuotaKind,
    pub total_mb: i64,
    /// Required for team quotas
    pub team_id: Option<String>,
}

impl CreateRootRequest {
    pub fn validate(&self) -> Result<()> {
        if self.total_mb <= 0 {
            return Err(QuotaError::Validation(
                "total_mb must be greater than 0".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(QuotaError::Validation("name is required".to_string()));
        }
        if self.kind == QuotaKind::Team && self.team_id.as_deref().map_or(true, str::is_empty) {
            return Err(QuotaError::Validation(
                "team_id is required for team quota".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request to carve a child quota out of a parent
#[derive(Debug, Clone, Deserialize)]
pub struct AllocateRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: QuotaKind,
    pub allocate_mb: i64,
    /// Team id for team children; ignored for organization children
    #[serde(default)]
    pub target_id: String,
    /// Users to grant admin on the new child
    #[serde(default)]
    pub admin_user_ids: Vec<String>,
}

impl AllocateRequest {
    pub fn validate(&self) -> Result<()> {
        if self.allocate_mb <= 0 {
            return Err(QuotaError::Validation(
                "allocate_mb must be greater than 0".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(QuotaError::Validation("name is required".to_string()));
        }
        if self.kind == QuotaKind::Team && self.target_id.is_empty() {
            return Err(QuotaError::Validation(
                "target_id is required for team quota".to_string(),
            ));
        }
        Ok(())
    }
}

/// Request to allocate or deallocate usage on a quota
#[derive(Debug, Clone, Deserialize)]
pub struct UsageRequest {
    pub resource_id: String,
    pub usage_mb: i64,
    #[serde(default)]
    pub reason: String,
}

impl UsageRequest {
    pub fn new(resource_id: &str, usage_mb: i64, reason: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            usage_mb,
            reason: reason.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.usage_mb <= 0 {
            return Err(QuotaError::Validation(
                "usage_mb must be greater than 0".to_string(),
            ));
        }
        if self.resource_id.is_empty() {
            return Err(QuotaError::Validation("resource_id is required".to_string()));
        }
        Ok(())
    }
}

/// Request to grant capabilities on a quota to another user
#[derive(Debug, Clone, Deserialize)]
pub struct GrantRequest {
    pub target_user_id: String,
    pub capabilities: Vec<Capability>,
}

impl GrantRequest {
    pub fn validate(&self) -> Result<()> {
        if self.target_user_id.is_empty() {
            return Err(QuotaError::Validation(
                "target_user_id is required".to_string(),
            ));
        }
        if self.capabilities.is_empty() {
            return Err(QuotaError::Validation(
                "at least one capability is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// A follow-up call that failed after the allocation committed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum FollowUpFailure {
    /// The child could not be registered with the authorization service
    Register { error: String },
    /// Admin could not be granted to one user
    Grant { user_id: String, error: String },
}

/// Result of a committed allocation
#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub node: QuotaNode,
    /// Empty when every post-commit call succeeded
    pub follow_up_failures: Vec<FollowUpFailure>,
}
