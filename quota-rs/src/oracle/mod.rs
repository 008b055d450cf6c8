//! Authorization oracle abstraction
//!
//! The quota manager never evaluates permissions itself. It asks an oracle
//! whether an actor holds capabilities on a quota node, registers new nodes
//! as protected resources, and forwards capability grants.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod http;
pub mod memory;

pub use http::HttpAuthorizationOracle;
pub use memory::MemoryOracle;

/// Resource type under which quota nodes are registered
pub const QUOTA_RESOURCE_TYPE: &str = "quota";

/// A resolved caller identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub organization_id: String,
    #[serde(default)]
    pub team_ids: Vec<String>,
}

impl Actor {
    pub fn new(user_id: &str, organization_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            organization_id: organization_id.to_string(),
            team_ids: Vec::new(),
        }
    }

    pub fn with_teams(mut self, team_ids: &[&str]) -> Self {
        self.team_ids = team_ids.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// A named permission an actor may hold on one quota node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Admin,
    Owner,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource to protect with the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResource {
    pub resource_id: String,
    pub resource_type: String,
    pub display_name: String,
    pub description: String,
}

impl ProtectedResource {
    pub fn quota(resource_id: &str, display_name: &str, description: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            resource_type: QUOTA_RESOURCE_TYPE.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Authorization oracle trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorizationOracle: Send + Sync {
    /// True only if the actor holds *all* requested capabilities
    async fn check_capability(
        &self,
        actor: &Actor,
        resource_id: &str,
        capabilities: &[Capability],
    ) -> Result<bool>;

    /// Register a newly created resource on behalf of `actor`
    async fn register_resource(&self, actor: &Actor, resource: &ProtectedResource) -> Result<()>;

    /// Grant capabilities on a resource to another actor
    async fn grant_capability(
        &self,
        admin: &Actor,
        target_actor_id: &str,
        resource_id: &str,
        capabilities: &[Capability],
    ) -> Result<()>;
}
