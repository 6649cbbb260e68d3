use chrono::{Duration, Utc};
use shellcn_domain::permission::{Permission, PermissionScope, ResourcePermission, Role};
use shellcn_domain::user::User;
use shellcn_iam::{Checker, PermissionRegistry, ResourceRef, RoleAdmin, register_builtin_permissions};
use shellcn_domain::identity::PrincipalType;
use shellcn_repository::{GrantRepo, MemoryStore, RoleRepo, UserRepo};
use std::sync::Arc;

fn user(id: &str, is_root: bool) -> User {
    User {
        id: id.to_owned(),
        username: id.to_owned(),
        email: format!("{id}@example.com"),
        password_hash: None,
        is_root,
        is_active: true,
        failed_attempts: 0,
        locked_until: None,
        mfa_secret: None,
        provider_type: None,
        external_subject: None,
        last_login_at: None,
        last_login_ip: None,
        created_at: Utc::now(),
    }
}

struct Fixture {
    store: MemoryStore,
    registry: Arc<PermissionRegistry>,
    checker: Arc<Checker>,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let registry = Arc::new(PermissionRegistry::new());
    register_builtin_permissions(&registry).unwrap();
    let repo: Arc<MemoryStore> = Arc::new(store.clone());
    let checker = Arc::new(Checker::new(
        Arc::clone(&registry),
        repo.clone(),
        repo.clone(),
        repo,
    ));
    Fixture { store, registry, checker }
}

#[tokio::test]
async fn root_bypasses_everything_including_late_registrations() {
    let f = fixture();
    f.store.create_user(user("root", true)).await.unwrap();

    // Registered after the user row existed.
    f.registry
        .register(Permission::new(
            "feature.future.action",
            "future",
            "Future action",
            PermissionScope::Resource,
        ))
        .unwrap();

    assert!(f.checker.check("root", "feature.future.action", None).await.unwrap());
    assert!(
        f.checker
            .check("root", "feature.future.action", Some(ResourceRef::new("connection", "c1")))
            .await
            .unwrap()
    );
    // Even ids no module ever declared.
    assert!(f.checker.check("root", "totally.unknown", None).await.unwrap());
}

#[tokio::test]
async fn global_permission_needs_only_role_membership() {
    let f = fixture();
    f.store.create_user(user("alice", false)).await.unwrap();
    f.store
        .create_role(Role {
            id: "operators".to_owned(),
            name: "Operators".to_owned(),
            is_system: false,
            permissions: vec!["vault.view".to_owned()],
        })
        .await
        .unwrap();
    f.store.assign_role("alice", "operators").await.unwrap();

    assert!(f.checker.check("alice", "vault.view", None).await.unwrap());
    assert!(!f.checker.check("alice", "vault.edit", None).await.unwrap());
}

#[tokio::test]
async fn resource_permission_needs_a_grant() {
    let f = fixture();
    f.store.create_user(user("bob", false)).await.unwrap();
    f.store
        .create_role(Role {
            id: "launchers".to_owned(),
            name: "Launchers".to_owned(),
            is_system: false,
            permissions: vec!["connection.launch".to_owned()],
        })
        .await
        .unwrap();
    f.store.assign_role("bob", "launchers").await.unwrap();

    let resource = ResourceRef::new("connection", "c1");
    assert!(!f.checker.check("bob", "connection.launch", Some(resource)).await.unwrap());

    f.store
        .grant(ResourcePermission {
            id: "g1".to_owned(),
            resource_type: "connection".to_owned(),
            resource_id: "c1".to_owned(),
            principal_type: PrincipalType::User,
            principal_id: "bob".to_owned(),
            permission_id: "connection.launch".to_owned(),
            expires_at: None,
            granted_by: "root".to_owned(),
            granted_at: Utc::now(),
        })
        .await
        .unwrap();
    f.checker.invalidate();

    assert!(f.checker.check("bob", "connection.launch", Some(resource)).await.unwrap());
    // A different connection is still denied.
    assert!(
        !f.checker
            .check("bob", "connection.launch", Some(ResourceRef::new("connection", "c2")))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn team_grant_authorizes_members() {
    let f = fixture();
    f.store.create_user(user("carol", false)).await.unwrap();
    f.store.add_team_member("team-a", "carol").await.unwrap();
    f.store
        .create_role(Role {
            id: "launchers".to_owned(),
            name: "Launchers".to_owned(),
            is_system: false,
            permissions: vec!["connection.launch".to_owned()],
        })
        .await
        .unwrap();
    f.store.assign_role("carol", "launchers").await.unwrap();
    f.store
        .grant(ResourcePermission {
            id: "g2".to_owned(),
            resource_type: "connection".to_owned(),
            resource_id: "c9".to_owned(),
            principal_type: PrincipalType::Team,
            principal_id: "team-a".to_owned(),
            permission_id: "connection.launch".to_owned(),
            expires_at: None,
            granted_by: "root".to_owned(),
            granted_at: Utc::now(),
        })
        .await
        .unwrap();

    assert!(
        f.checker
            .check("carol", "connection.launch", Some(ResourceRef::new("connection", "c9")))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn expired_grant_is_ignored() {
    let f = fixture();
    f.store.create_user(user("dave", false)).await.unwrap();
    f.store
        .create_role(Role {
            id: "launchers".to_owned(),
            name: "Launchers".to_owned(),
            is_system: false,
            permissions: vec!["connection.launch".to_owned()],
        })
        .await
        .unwrap();
    f.store.assign_role("dave", "launchers").await.unwrap();
    f.store
        .grant(ResourcePermission {
            id: "g3".to_owned(),
            resource_type: "connection".to_owned(),
            resource_id: "c1".to_owned(),
            principal_type: PrincipalType::User,
            principal_id: "dave".to_owned(),
            permission_id: "connection.launch".to_owned(),
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            granted_by: "root".to_owned(),
            granted_at: Utc::now() - Duration::hours(1),
        })
        .await
        .unwrap();

    assert!(
        !f.checker
            .check("dave", "connection.launch", Some(ResourceRef::new("connection", "c1")))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn role_mutations_invalidate_cached_sets() {
    let f = fixture();
    f.store.create_user(user("erin", false)).await.unwrap();
    let repo: Arc<MemoryStore> = Arc::new(f.store.clone());
    let admin = RoleAdmin::new(repo.clone(), repo, Arc::clone(&f.checker));

    admin
        .create_role(Role {
            id: "viewers".to_owned(),
            name: "Viewers".to_owned(),
            is_system: false,
            permissions: vec!["vault.view".to_owned()],
        })
        .await
        .unwrap();

    // Prime the cache with an empty effective set.
    assert!(!f.checker.check("erin", "vault.view", None).await.unwrap());

    admin.assign_role("erin", "viewers").await.unwrap();
    assert!(f.checker.check("erin", "vault.view", None).await.unwrap());

    admin.unassign_role("erin", "viewers").await.unwrap();
    assert!(!f.checker.check("erin", "vault.view", None).await.unwrap());
}
