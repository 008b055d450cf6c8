//! In-process authorization oracle
//!
//! Keeps grants in memory. Used when the external auth service is disabled
//! and by tests.

use super::{Actor, AuthorizationOracle, Capability, ProtectedResource};
use crate::error::{QuotaError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// (user id, resource id)
type GrantKey = (String, String);

pub struct MemoryOracle {
    grants: RwLock<HashMap<GrantKey, HashSet<Capability>>>,
    resources: RwLock<HashMap<String, ProtectedResource>>,
    permissive: bool,
}

impl MemoryOracle {
    /// Oracle that only allows what has been granted
    pub fn new() -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
            permissive: false,
        }
    }

    /// Oracle that allows every capability check
    pub fn permissive() -> Self {
        Self {
            permissive: true,
            ..Self::new()
        }
    }

    /// Give `user_id` capabilities on a resource directly
    pub async fn allow(&self, user_id: &str, resource_id: &str, capabilities: &[Capability]) {
        let mut grants = self.grants.write().await;
        grants
            .entry((user_id.to_string(), resource_id.to_string()))
            .or_default()
            .extend(capabilities.iter().copied());
    }

    pub async fn capabilities_of(&self, user_id: &str, resource_id: &str) -> HashSet<Capability> {
        let grants = self.grants.read().await;
        grants
            .get(&(user_id.to_string(), resource_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_registered(&self, resource_id: &str) -> bool {
        self.resources.read().await.contains_key(resource_id)
    }

    async fn holds(&self, user_id: &str, resource_id: &str, capabilities: &[Capability]) -> bool {
        let held = self.capabilities_of(user_id, resource_id).await;
        capabilities.iter().all(|cap| held.contains(cap))
    }
}

impl Default for MemoryOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorizationOracle for MemoryOracle {
    async fn check_capability(
        &self,
        actor: &Actor,
        resource_id: &str,
        capabilities: &[Capability],
    ) -> Result<bool> {
        if self.permissive {
            return Ok(true);
        }
        Ok(self.holds(&actor.user_id, resource_id, capabilities).await)
    }

    async fn register_resource(&self, actor: &Actor, resource: &ProtectedResource) -> Result<()> {
        {
            let mut resources = self.resources.write().await;
            if resources.contains_key(&resource.resource_id) {
                return Err(QuotaError::Upstream(format!(
                    "resource already exists: {}",
                    resource.resource_id
                )));
            }
            resources.insert(resource.resource_id.clone(), resource.clone());
        }

        // The registering actor owns what it creates
        self.allow(
            &actor.user_id,
            &resource.resource_id,
            &[Capability::Owner, Capability::Admin, Capability::Read],
        )
        .await;

        debug!(
            resource_id = %resource.resource_id,
            user_id = %actor.user_id,
            "Registered protected resource"
        );
        Ok(())
    }

    async fn grant_capability(
        &self,
        admin: &Actor,
        target_actor_id: &str,
        resource_id: &str,
        capabilities: &[Capability],
    ) -> Result<()> {
        if !self.is_registered(resource_id).await {
            return Err(QuotaError::Upstream(format!(
                "unknown resource: {}",
                resource_id
            )));
        }

        if !self.permissive && !self.holds(&admin.user_id, resource_id, &[Capability::Admin]).await
        {
            return Err(QuotaError::Upstream(format!(
                "{} may not grant on {}",
                admin.user_id, resource_id
            )));
        }

        self.allow(target_actor_id, resource_id, capabilities).await;
        Ok(())
    }
}
