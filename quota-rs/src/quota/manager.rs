//! Quota manager - capacity operations over the ledger
//!
//! Every operation checks capabilities with the authorization oracle first,
//! then runs as a single transaction: lock the node, validate, mutate, append
//! journal and audit rows, commit. Any error before commit drops the
//! transaction and rolls everything back.

use crate::error::{QuotaError, Result};
use crate::journal::{actions, AuditEntry, AuditTrail, UsageJournal, UsageOperation, UsageRecord};
use crate::ledger::{LedgerStore, QuotaNode};
use crate::oracle::{Actor, AuthorizationOracle, Capability, ProtectedResource};
use crate::quota::types::{
    Allocation, AllocateRequest, CreateRootRequest, FollowUpFailure, GrantRequest, UsageRequest,
};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates quota operations against the ledger, journals and oracle
pub struct QuotaManager {
    store: LedgerStore,
    usage: UsageJournal,
    audit: AuditTrail,
    oracle: Arc<dyn AuthorizationOracle>,
}

impl QuotaManager {
    pub fn new(db: SqlitePool, oracle: Arc<dyn AuthorizationOracle>) -> Self {
        Self {
            store: LedgerStore::new(db.clone()),
            usage: UsageJournal::new(db.clone()),
            audit: AuditTrail::new(db),
            oracle,
        }
    }

    /// Initialize ledger, journal and audit tables
    pub async fn init_db(&self) -> Result<()> {
        self.store.init_db().await?;
        self.usage.init_db().await?;
        self.audit.init_db().await?;
        Ok(())
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn usage_journal(&self) -> &UsageJournal {
        &self.usage
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }

    async fn require(
        &self,
        actor: &Actor,
        quota_id: &str,
        capability: Capability,
        action: &str,
    ) -> Result<()> {
        let allowed = self
            .oracle
            .check_capability(actor, quota_id, &[capability])
            .await?;

        if !allowed {
            debug!(
                user_id = %actor.user_id,
                quota_id = %quota_id,
                capability = %capability,
                "Capability check denied"
            );
            return Err(QuotaError::PermissionDenied(format!(
                "insufficient permissions to {} quota {}",
                action, quota_id
            )));
        }
        Ok(())
    }

    /// Create a root quota owned by `actor` in the actor's organization
    pub async fn create_root(&self, actor: &Actor, request: CreateRootRequest) -> Result<QuotaNode> {
        request.validate()?;
        if actor.organization_id.is_empty() {
            return Err(QuotaError::Validation(
                "actor has no organization".to_string(),
            ));
        }

        let node = QuotaNode::root(
            QuotaNode::new_id(),
            request.name,
            request.description,
            request.kind,
            request.total_mb,
            actor.user_id.clone(),
            actor.organization_id.clone(),
            request.team_id,
        );

        let mut tx = self.store.begin().await?;
        self.store.insert_node(&mut tx, &node).await?;

        let entry = AuditEntry::new(&node.id, actions::CREATE, &actor.user_id).with_details(json!({
            "name": node.name,
            "kind": node.kind,
            "total_mb": node.total_mb,
        }));
        self.audit.append(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(
            quota_id = %node.id,
            kind = node.kind.as_str(),
            total_mb = node.total_mb,
            organization_id = %node.organization_id,
            owner_id = %node.owner_id,
            "Root quota created"
        );

        let resource = ProtectedResource::quota(&node.id, &node.name, &node.description);
        if let Err(e) = self.oracle.register_resource(actor, &resource).await {
            warn!(
                quota_id = %node.id,
                error = %e,
                "Root quota committed but could not be registered with the authorization service"
            );
        }

        Ok(node)
    }

    /// Carve a child quota out of `parent_id`
    pub async fn allocate(
        &self,
        actor: &Actor,
        parent_id: &str,
        request: AllocateRequest,
    ) -> Result<Allocation> {
        request.validate()?;
        self.require(actor, parent_id, Capability::Admin, "allocate from")
            .await?;

        let mut tx = self.store.begin().await?;
        let parent = self.store.lock_node(&mut tx, parent_id).await?;

        let available = parent.available_mb();
        if available < request.allocate_mb {
            return Err(QuotaError::InsufficientCapacity {
                available,
                requested: request.allocate_mb,
            });
        }

        parent.check_child_allowed(request.kind, &request.target_id)?;

        let child = parent.child(
            QuotaNode::new_id(),
            request.name,
            request.description,
            request.kind,
            request.allocate_mb,
            &request.target_id,
        );
        self.store.insert_node(&mut tx, &child).await?;
        self.store
            .adjust_allocated(&mut tx, &parent.id, request.allocate_mb)
            .await?;

        let entry = AuditEntry::new(&child.id, actions::ALLOCATE, &actor.user_id).with_details(json!({
            "parent_quota_id": parent.id,
            "allocated_mb": request.allocate_mb,
            "name": child.name,
            "kind": child.kind,
        }));
        self.audit.append(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(
            parent_quota_id = %parent.id,
            child_quota_id = %child.id,
            allocated_mb = request.allocate_mb,
            admin_user_ids = ?request.admin_user_ids,
            "Quota allocated"
        );

        let follow_up_failures = self
            .after_allocate(actor, &child, &request.admin_user_ids)
            .await;

        Ok(Allocation {
            node: child,
            follow_up_failures,
        })
    }

    /// Register a committed child and hand out admin grants
    ///
    /// Failures here never touch the ledger; they are logged and returned.
    async fn after_allocate(
        &self,
        actor: &Actor,
        child: &QuotaNode,
        admin_user_ids: &[String],
    ) -> Vec<FollowUpFailure> {
        let mut failures = Vec::new();

        let resource = ProtectedResource::quota(&child.id, &child.name, &child.description);
        if let Err(e) = self.oracle.register_resource(actor, &resource).await {
            warn!(
                child_quota_id = %child.id,
                error = %e,
                "Allocation committed but child could not be registered with the authorization service"
            );
            failures.push(FollowUpFailure::Register {
                error: e.to_string(),
            });
            return failures;
        }

        for admin_user_id in admin_user_ids {
            if let Err(e) = self
                .oracle
                .grant_capability(actor, admin_user_id, &child.id, &[Capability::Admin])
                .await
            {
                warn!(
                    child_quota_id = %child.id,
                    admin_user_id = %admin_user_id,
                    error = %e,
                    "Failed to grant admin permission"
                );
                failures.push(FollowUpFailure::Grant {
                    user_id: admin_user_id.clone(),
                    error: e.to_string(),
                });
            }
        }

        failures
    }

    /// Release an empty quota and return its capacity to the parent
    pub async fn release(&self, actor: &Actor, quota_id: &str) -> Result<()> {
        self.require(actor, quota_id, Capability::Admin, "release").await?;

        let mut tx = self.store.begin().await?;
        let node = self.store.lock_node(&mut tx, quota_id).await?;

        if node.used_mb > 0 || node.allocated_mb > 0 {
            return Err(QuotaError::BusyResource {
                used_mb: node.used_mb,
                allocated_mb: node.allocated_mb,
            });
        }

        if let Some(parent_id) = &node.parent_id {
            self.store
                .adjust_allocated(&mut tx, parent_id, -node.total_mb)
                .await?;
        }

        self.store.mark_deleted(&mut tx, &node.id, Utc::now()).await?;

        let entry = AuditEntry::new(&node.id, actions::RELEASE, &actor.user_id).with_details(json!({
            "parent_quota_id": node.parent_id,
            "returned_mb": node.total_mb,
        }));
        self.audit.append(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(
            quota_id = %node.id,
            parent_quota_id = ?node.parent_id,
            returned_mb = node.total_mb,
            "Quota released"
        );
        Ok(())
    }

    /// Consume `usage_mb` of a quota's headroom
    pub async fn allocate_usage(
        &self,
        actor: &Actor,
        quota_id: &str,
        request: &UsageRequest,
    ) -> Result<()> {
        self.apply_usage(actor, quota_id, request, UsageOperation::Allocate)
            .await
    }

    /// Return `usage_mb` of previously allocated usage
    pub async fn deallocate_usage(
        &self,
        actor: &Actor,
        quota_id: &str,
        request: &UsageRequest,
    ) -> Result<()> {
        self.apply_usage(actor, quota_id, request, UsageOperation::Deallocate)
            .await
    }

    async fn apply_usage(
        &self,
        actor: &Actor,
        quota_id: &str,
        request: &UsageRequest,
        operation: UsageOperation,
    ) -> Result<()> {
        request.validate()?;
        self.require(actor, quota_id, Capability::Read, "use").await?;

        let mut tx = self.store.begin().await?;
        let node = self.store.lock_node(&mut tx, quota_id).await?;

        let (delta, action) = match operation {
            UsageOperation::Allocate => {
                let available = node.available_mb();
                if available < request.usage_mb {
                    return Err(QuotaError::InsufficientCapacity {
                        available,
                        requested: request.usage_mb,
                    });
                }
                (request.usage_mb, actions::USAGE_ALLOCATE)
            }
            UsageOperation::Deallocate => {
                if node.used_mb < request.usage_mb {
                    return Err(QuotaError::Validation(format!(
                        "cannot deallocate {} MB, only {} MB in use",
                        request.usage_mb, node.used_mb
                    )));
                }
                (-request.usage_mb, actions::USAGE_DEALLOCATE)
            }
        };

        self.store.adjust_used(&mut tx, &node.id, delta).await?;

        let record = UsageRecord::new(
            &node.id,
            &actor.user_id,
            &request.resource_id,
            request.usage_mb,
            operation,
            &request.reason,
        );
        self.usage.append(&mut tx, &record).await?;

        let entry = AuditEntry::new(&node.id, action, &actor.user_id).with_details(json!({
            "resource_id": request.resource_id,
            "usage_mb": request.usage_mb,
            "reason": request.reason,
        }));
        self.audit.append(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(
            quota_id = %node.id,
            resource_id = %request.resource_id,
            usage_mb = request.usage_mb,
            operation = operation.as_str(),
            "Quota usage updated"
        );
        Ok(())
    }

    /// Read a live quota node
    pub async fn get_node(&self, actor: &Actor, quota_id: &str) -> Result<QuotaNode> {
        self.require(actor, quota_id, Capability::Read, "view").await?;
        self.store.get_node(quota_id).await
    }

    /// Grant capabilities on a quota to another user and audit it
    pub async fn grant_capability(
        &self,
        actor: &Actor,
        quota_id: &str,
        request: GrantRequest,
    ) -> Result<()> {
        request.validate()?;
        self.require(actor, quota_id, Capability::Admin, "grant on")
            .await?;

        // Terminal nodes take no new grants
        self.store.get_node(quota_id).await?;

        self.oracle
            .grant_capability(actor, &request.target_user_id, quota_id, &request.capabilities)
            .await?;

        // A release may have committed while the grant was in flight
        let mut tx = self.store.begin().await?;
        if let Err(e) = self.store.lock_node(&mut tx, quota_id).await {
            warn!(
                quota_id = %quota_id,
                target_user_id = %request.target_user_id,
                error = %e,
                "Grant sent but quota could not be locked for audit"
            );
            return Err(e);
        }

        let entry = AuditEntry::new(quota_id, actions::GRANT_PERMISSION, &actor.user_id)
            .with_target(&request.target_user_id)
            .with_details(json!({ "capabilities": request.capabilities }));
        self.audit.append(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(
            quota_id = %quota_id,
            target_user_id = %request.target_user_id,
            capabilities = ?request.capabilities,
            "Quota permission granted"
        );
        Ok(())
    }
}
