/// Hierarchical quota management
///
/// This module enforces the capacity ledger rules for:
/// - Root creation and child allocation
/// - Release of empty quotas back to their parent
/// - Usage allocation and deallocation against a node's headroom
/// - Capability grants on quota nodes

pub mod manager;
pub mod types;

pub use manager::QuotaManager;
pub use types::{
    Allocation, AllocateRequest, CreateRootRequest, FollowUpFailure, GrantRequest, UsageRequest,
};
