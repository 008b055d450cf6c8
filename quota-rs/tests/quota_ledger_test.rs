//! Integration tests for the quota ledger

use quota_rs::journal::{actions, UsageOperation};
use quota_rs::ledger::{QuotaKind, QuotaNode};
use quota_rs::oracle::{Actor, Capability, MemoryOracle};
use quota_rs::quota::{
    AllocateRequest, CreateRootRequest, GrantRequest, QuotaManager, UsageRequest,
};
use quota_rs::QuotaError;
use sqlx::SqlitePool;
use std::sync::Arc;

async fn setup_manager(oracle: MemoryOracle) -> QuotaManager {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let manager = QuotaManager::new(pool, Arc::new(oracle));
    manager.init_db().await.unwrap();
    manager
}

fn owner() -> Actor {
    Actor::new("user_1", "org_1")
}

async fn create_org_root(manager: &QuotaManager, total_mb: i64) -> QuotaNode {
    let request = CreateRootRequest {
        name: "Acme".to_string(),
        description: "Company storage".to_string(),
        kind: QuotaKind::Organization,
        total_mb,
        team_id: None,
    };
    manager.create_root(&owner(), request).await.unwrap()
}

fn child_request(kind: QuotaKind, mb: i64, target_id: &str) -> AllocateRequest {
    AllocateRequest {
        name: format!("{}-{}", kind.as_str(), target_id),
        description: String::new(),
        kind,
        allocate_mb: mb,
        target_id: target_id.to_string(),
        admin_user_ids: Vec::new(),
    }
}

/// allocated_mb equals the sum of live children and nothing is over-committed
async fn assert_balanced(manager: &QuotaManager, node: &QuotaNode) {
    let stored = manager.store().get_node(&node.id).await.unwrap();
    let children = manager.store().active_children(&node.id).await.unwrap();
    let children_total: i64 = children.iter().map(|c| c.total_mb).sum();

    assert_eq!(stored.allocated_mb, children_total);
    assert!(stored.used_mb + stored.allocated_mb <= stored.total_mb);
}

#[tokio::test]
async fn test_create_root() {
    let manager = setup_manager(MemoryOracle::new()).await;
    let root = create_org_root(&manager, 10_000).await;

    assert!(root.id.starts_with("quota_"));
    assert!(root.is_root());
    assert_eq!(root.level, 0);
    assert_eq!(root.path, format!("/{}", root.id));
    assert_eq!(root.owner_id, "user_1");
    assert_eq!(root.organization_id, "org_1");
    assert_eq!(root.available_mb(), 10_000);
}

#[tokio::test]
async fn test_create_root_requires_organization() {
    let manager = setup_manager(MemoryOracle::new()).await;
    let request = CreateRootRequest {
        name: "Acme".to_string(),
        description: String::new(),
        kind: QuotaKind::Organization,
        total_mb: 100,
        team_id: None,
    };

    let result = manager.create_root(&Actor::new("user_1", ""), request).await;
    assert!(matches!(result, Err(QuotaError::Validation(_))));
}

#[tokio::test]
async fn test_creator_is_admin_of_root_and_children() {
    let oracle = Arc::new(MemoryOracle::new());
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let manager = QuotaManager::new(pool, oracle.clone());
    manager.init_db().await.unwrap();

    let root = create_org_root(&manager, 10_000).await;
    assert!(oracle.is_registered(&root.id).await);

    let mut request = child_request(QuotaKind::Team, 2_000, "T1");
    request.admin_user_ids = vec!["user_2".to_string()];
    let allocation = manager.allocate(&owner(), &root.id, request).await.unwrap();
    assert!(allocation.follow_up_failures.is_empty());

    let child = allocation.node;
    assert!(oracle.is_registered(&child.id).await);
    assert!(oracle
        .capabilities_of("user_2", &child.id)
        .await
        .contains(&Capability::Admin));

    // user_2 administers the child but not the root
    let user_2 = Actor::new("user_2", "org_1").with_teams(&["T1"]);
    let denied = manager
        .allocate(&user_2, &root.id, child_request(QuotaKind::Team, 10, "T1"))
        .await;
    assert!(matches!(denied, Err(QuotaError::PermissionDenied(_))));

    let nested = manager
        .allocate(&user_2, &child.id, child_request(QuotaKind::Team, 10, "T1"))
        .await
        .unwrap();
    assert_eq!(nested.node.owner_id, "user_1");
}

#[tokio::test]
async fn test_allocate_preserves_ledger_balance() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 10_000).await;

    let team_1 = manager
        .allocate(&owner(), &root.id, child_request(QuotaKind::Team, 2_000, "T1"))
        .await
        .unwrap()
        .node;
    let team_2 = manager
        .allocate(&owner(), &root.id, child_request(QuotaKind::Team, 3_000, "T2"))
        .await
        .unwrap()
        .node;
    manager
        .allocate(&owner(), &team_1.id, child_request(QuotaKind::Team, 500, "T1"))
        .await
        .unwrap();

    assert_balanced(&manager, &root).await;
    assert_balanced(&manager, &team_1).await;
    assert_balanced(&manager, &team_2).await;

    let stored_root = manager.store().get_node(&root.id).await.unwrap();
    assert_eq!(stored_root.allocated_mb, 5_000);
    assert_eq!(stored_root.available_mb(), 5_000);

    assert_eq!(team_1.level, 1);
    assert_eq!(team_1.path, format!("/{}/{}", root.id, team_1.id));
    assert_eq!(team_1.team_id.as_deref(), Some("T1"));

    let subtree = manager.store().subtree(&root).await.unwrap();
    assert_eq!(subtree.len(), 3);
    assert!(subtree.windows(2).all(|w| w[0].level <= w[1].level));
}

#[tokio::test]
async fn test_allocate_beyond_capacity() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 1_000).await;

    manager
        .allocate_usage(&owner(), &root.id, &UsageRequest::new("vm-1", 400, "boot disk"))
        .await
        .unwrap();

    let result = manager
        .allocate(&owner(), &root.id, child_request(QuotaKind::Team, 700, "T1"))
        .await;
    assert!(matches!(
        result,
        Err(QuotaError::InsufficientCapacity {
            available: 600,
            requested: 700
        })
    ));

    // Exactly the remaining headroom is fine
    manager
        .allocate(&owner(), &root.id, child_request(QuotaKind::Team, 600, "T1"))
        .await
        .unwrap();
    let stored = manager.store().get_node(&root.id).await.unwrap();
    assert_eq!(stored.available_mb(), 0);
}

#[tokio::test]
async fn test_team_hierarchy_rules() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 10_000).await;

    let team_1 = manager
        .allocate(&owner(), &root.id, child_request(QuotaKind::Team, 2_000, "T1"))
        .await
        .unwrap()
        .node;

    let other_team = manager
        .allocate(&owner(), &team_1.id, child_request(QuotaKind::Team, 100, "T2"))
        .await;
    assert!(matches!(other_team, Err(QuotaError::HierarchyViolation(_))));

    let organization = manager
        .allocate(
            &owner(),
            &team_1.id,
            child_request(QuotaKind::Organization, 100, ""),
        )
        .await;
    assert!(matches!(organization, Err(QuotaError::HierarchyViolation(_))));

    manager
        .allocate(&owner(), &team_1.id, child_request(QuotaKind::Team, 100, "T1"))
        .await
        .unwrap();

    // Rejected attempts left no capacity behind
    let stored = manager.store().get_node(&team_1.id).await.unwrap();
    assert_eq!(stored.allocated_mb, 100);
}

#[tokio::test]
async fn test_release_returns_capacity() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 10_000).await;

    let child = manager
        .allocate(&owner(), &root.id, child_request(QuotaKind::Team, 2_000, "T1"))
        .await
        .unwrap()
        .node;

    manager.release(&owner(), &child.id).await.unwrap();

    let stored = manager.store().get_node(&root.id).await.unwrap();
    assert_eq!(stored.allocated_mb, 0);
    assert_eq!(stored.available_mb(), 10_000);
    assert!(manager.store().active_children(&root.id).await.unwrap().is_empty());

    let audit = manager.audit_trail().for_node(&child.id).await.unwrap();
    let tags: Vec<&str> = audit.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(tags, vec![actions::ALLOCATE, actions::RELEASE]);
    assert_eq!(audit[1].details["returned_mb"], 2_000);
}

#[tokio::test]
async fn test_release_empty_root() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 10).await;

    manager.release(&owner(), &root.id).await.unwrap();

    let usage = manager
        .deallocate_usage(&owner(), &root.id, &UsageRequest::new("vm-1", 1, ""))
        .await;
    assert!(matches!(usage, Err(QuotaError::NotFound(_))));

    let audit = manager.audit_trail().for_node(&root.id).await.unwrap();
    let tags: Vec<&str> = audit.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(tags, vec![actions::CREATE, actions::RELEASE]);
    assert!(audit[1].details["parent_quota_id"].is_null());
    assert_eq!(audit[1].details["returned_mb"], 10);
    assert!(manager.usage_journal().for_node(&root.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_release_busy_node() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 10_000).await;
    let child = manager
        .allocate(&owner(), &root.id, child_request(QuotaKind::Team, 2_000, "T1"))
        .await
        .unwrap()
        .node;

    manager
        .allocate_usage(&owner(), &child.id, &UsageRequest::new("vm-1", 1, ""))
        .await
        .unwrap();
    let result = manager.release(&owner(), &child.id).await;
    assert!(matches!(
        result,
        Err(QuotaError::BusyResource {
            used_mb: 1,
            allocated_mb: 0
        })
    ));

    // A node with live children is busy too
    let result = manager.release(&owner(), &root.id).await;
    assert!(matches!(
        result,
        Err(QuotaError::BusyResource {
            allocated_mb: 2_000,
            ..
        })
    ));

    let stored = manager.store().get_node(&root.id).await.unwrap();
    assert_eq!(stored.allocated_mb, 2_000);
}

#[tokio::test]
async fn test_usage_roundtrip() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 1_000).await;

    manager
        .allocate_usage(&owner(), &root.id, &UsageRequest::new("vm-1", 300, "disk"))
        .await
        .unwrap();
    manager
        .deallocate_usage(&owner(), &root.id, &UsageRequest::new("vm-1", 300, "cleanup"))
        .await
        .unwrap();

    let stored = manager.get_node(&owner(), &root.id).await.unwrap();
    assert_eq!(stored.used_mb, 0);
    assert_eq!(stored.available_mb(), 1_000);

    let usage = manager.usage_journal().for_node(&root.id).await.unwrap();
    assert_eq!(usage.len(), 2);
    assert_eq!(usage[0].operation, UsageOperation::Allocate);
    assert_eq!(usage[1].operation, UsageOperation::Deallocate);
    assert_eq!(usage[1].reason, "cleanup");
    assert!(usage.iter().all(|r| r.usage_mb == 300 && r.user_id == "user_1"));

    let audit = manager.audit_trail().for_node(&root.id).await.unwrap();
    let tags: Vec<&str> = audit.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        tags,
        vec![actions::CREATE, actions::USAGE_ALLOCATE, actions::USAGE_DEALLOCATE]
    );
}

#[tokio::test]
async fn test_deallocate_more_than_used() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 1_000).await;

    manager
        .allocate_usage(&owner(), &root.id, &UsageRequest::new("vm-1", 100, ""))
        .await
        .unwrap();

    let result = manager
        .deallocate_usage(&owner(), &root.id, &UsageRequest::new("vm-1", 101, ""))
        .await;
    assert!(matches!(result, Err(QuotaError::Validation(_))));

    let stored = manager.store().get_node(&root.id).await.unwrap();
    assert_eq!(stored.used_mb, 100);
    assert_eq!(manager.usage_journal().for_node(&root.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_non_positive_amounts_rejected() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 1_000).await;

    let result = manager
        .allocate(&owner(), &root.id, child_request(QuotaKind::Team, 0, "T1"))
        .await;
    assert!(matches!(result, Err(QuotaError::Validation(_))));

    let result = manager
        .allocate_usage(&owner(), &root.id, &UsageRequest::new("vm-1", -5, ""))
        .await;
    assert!(matches!(result, Err(QuotaError::Validation(_))));
}

#[tokio::test]
async fn test_get_node_is_idempotent() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 1_000).await;

    let first = manager.get_node(&owner(), &root.id).await.unwrap();
    let second = manager.get_node(&owner(), &root.id).await.unwrap();
    assert_eq!(first, second);

    let missing = manager.get_node(&owner(), "quota_missing").await;
    assert!(matches!(missing, Err(QuotaError::NotFound(_))));
}

#[tokio::test]
async fn test_deleted_node_is_terminal() {
    let manager = setup_manager(MemoryOracle::permissive()).await;
    let root = create_org_root(&manager, 10_000).await;
    let child = manager
        .allocate(&owner(), &root.id, child_request(QuotaKind::Team, 2_000, "T1"))
        .await
        .unwrap()
        .node;
    manager.release(&owner(), &child.id).await.unwrap();

    let again = manager.release(&owner(), &child.id).await;
    assert!(matches!(again, Err(QuotaError::NotFound(_))));

    let allocate = manager
        .allocate(&owner(), &child.id, child_request(QuotaKind::Team, 10, "T1"))
        .await;
    assert!(matches!(allocate, Err(QuotaError::NotFound(_))));

    let usage = manager
        .allocate_usage(&owner(), &child.id, &UsageRequest::new("vm-1", 1, ""))
        .await;
    assert!(matches!(usage, Err(QuotaError::NotFound(_))));

    let get = manager.get_node(&owner(), &child.id).await;
    assert!(matches!(get, Err(QuotaError::NotFound(_))));

    // Releasing the child twice did not return its capacity twice
    let stored = manager.store().get_node(&root.id).await.unwrap();
    assert_eq!(stored.allocated_mb, 0);
}

#[tokio::test]
async fn test_grant_capability_is_audited() {
    let manager = setup_manager(MemoryOracle::new()).await;
    let root = create_org_root(&manager, 1_000).await;
    let reader = Actor::new("user_2", "org_1");

    let denied = manager.get_node(&reader, &root.id).await;
    assert!(matches!(denied, Err(QuotaError::PermissionDenied(_))));

    manager
        .grant_capability(
            &owner(),
            &root.id,
            GrantRequest {
                target_user_id: "user_2".to_string(),
                capabilities: vec![Capability::Read],
            },
        )
        .await
        .unwrap();

    assert!(manager.get_node(&reader, &root.id).await.is_ok());

    // Read is not enough to hand out grants
    let escalation = manager
        .grant_capability(
            &reader,
            &root.id,
            GrantRequest {
                target_user_id: "user_2".to_string(),
                capabilities: vec![Capability::Admin],
            },
        )
        .await;
    assert!(matches!(escalation, Err(QuotaError::PermissionDenied(_))));

    let audit = manager.audit_trail().for_node(&root.id).await.unwrap();
    let grant = audit
        .iter()
        .find(|e| e.action == actions::GRANT_PERMISSION)
        .unwrap();
    assert_eq!(grant.actor_id, "user_1");
    assert_eq!(grant.target_actor_id.as_deref(), Some("user_2"));
    assert_eq!(grant.details["capabilities"][0], "read");
    assert_eq!(audit.len(), 2);
}
