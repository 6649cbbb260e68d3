use chrono::{Duration, Utc};
use shellcn_domain::connection::{Connection, ConnectionTarget};
use shellcn_domain::identity::{
    CredentialVersion, Identity, IdentityScope, IdentityShare, PrincipalType, SharePermission,
};
use shellcn_domain::permission::ResourcePermission;
use shellcn_domain::user::User;
use shellcn_repository::{
    ConnectionRepo, CredentialVersionRepo, GrantRepo, IdentityRepo, MemoryStore, RepoError,
    ShareRepo, TargetRepo, TxContext, UserRepo,
};
use std::collections::BTreeMap;

fn sample_user(id: &str, username: &str) -> User {
    User {
        id: id.to_owned(),
        username: username.to_owned(),
        email: format!("{username}@example.com"),
        password_hash: None,
        is_root: false,
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

fn sample_identity(id: &str, owner: &str) -> Identity {
    let now = Utc::now();
    Identity {
        id: id.to_owned(),
        name: format!("identity-{id}"),
        scope: IdentityScope::Global,
        owner_id: owner.to_owned(),
        team_id: None,
        connection_id: None,
        template: None,
        version: 1,
        key_id: "key-1".to_owned(),
        encrypted_payload: vec![1, 2, 3],
        metadata: BTreeMap::new(),
        usage_count: 0,
        last_used_at: None,
        last_rotated_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn duplicate_usernames_are_rejected_case_insensitively() {
    let store = MemoryStore::new();
    store.create_user(sample_user("u1", "Alice")).await.unwrap();

    let dup = store.create_user(sample_user("u2", "alice")).await;
    assert!(matches!(dup, Err(RepoError::AlreadyExists { .. })));

    let found = store.find_user_by_login("ALICE").await.unwrap();
    assert_eq!(found.id, "u1");
    let by_email = store.find_user_by_login("Alice@Example.com").await.unwrap();
    assert_eq!(by_email.id, "u1");
}

#[tokio::test]
async fn missing_rows_surface_not_found() {
    let store = MemoryStore::new();
    assert!(matches!(store.find_user("ghost").await, Err(RepoError::NotFound { .. })));
    assert!(matches!(store.find_identity("ghost").await, Err(RepoError::NotFound { .. })));
    assert!(matches!(store.find_connection("ghost").await, Err(RepoError::NotFound { .. })));
}

#[tokio::test]
async fn secret_update_is_versioned_and_duplicate_safe() {
    let store = MemoryStore::new();
    store.create_identity(sample_identity("i1", "u1")).await.unwrap();
    let tx = TxContext::new();

    let mut updated = sample_identity("i1", "u1");
    updated.version = 2;
    updated.encrypted_payload = vec![9, 9];
    let history = CredentialVersion {
        identity_id: "i1".to_owned(),
        version: 1,
        key_id: "key-1".to_owned(),
        encrypted_payload: vec![1, 2, 3],
        created_at: Utc::now(),
    };

    store.update_identity_secret(&tx, updated.clone(), history.clone()).await.unwrap();
    assert_eq!(store.find_identity("i1").await.unwrap().version, 2);
    assert_eq!(store.list_versions("i1").await.unwrap().len(), 1);

    // Replaying the same history version must fail and leave the row untouched.
    let replay = store.update_identity_secret(&tx, updated, history).await;
    assert!(matches!(replay, Err(RepoError::AlreadyExists { .. })));
    assert_eq!(store.find_identity("i1").await.unwrap().version, 2);
}

#[tokio::test]
async fn share_upsert_keeps_one_active_row() {
    let store = MemoryStore::new();
    let now = Utc::now();
    let share = |perm: SharePermission| IdentityShare {
        id: shellcn_kernel::safe_nanoid!(),
        identity_id: "i1".to_owned(),
        principal_type: PrincipalType::User,
        principal_id: "u2".to_owned(),
        permission: perm,
        expires_at: None,
        granted_by: "u1".to_owned(),
        granted_at: now,
        revoked_at: None,
        revoked_by: None,
    };

    store.upsert_share(share(SharePermission::Use)).await.unwrap();
    store.upsert_share(share(SharePermission::Edit)).await.unwrap();

    let shares = store.list_shares_for_identity("i1").await.unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].permission, SharePermission::Edit);

    store.revoke_share("i1", PrincipalType::User, "u2", "u1", now).await.unwrap();
    let shares = store.list_shares_for_identity("i1").await.unwrap();
    assert_eq!(shares.len(), 1, "revocation is soft; the row survives");
    assert!(shares[0].revoked_at.is_some());

    // A new grant after revocation creates a second (active) row.
    store.upsert_share(share(SharePermission::Use)).await.unwrap();
    assert_eq!(store.list_shares_for_identity("i1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn connection_delete_cascades_targets_and_grants() {
    let store = MemoryStore::new();
    let now = Utc::now();
    store
        .create_connection(Connection {
            id: "c1".to_owned(),
            name: "box".to_owned(),
            protocol_id: "ssh".to_owned(),
            owner_id: "u1".to_owned(),
            team_id: None,
            settings: BTreeMap::new(),
            identity_id: None,
            concurrent_limit: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    store
        .set_targets("c1", vec![ConnectionTarget {
            id: "t1".to_owned(),
            connection_id: "c1".to_owned(),
            host: "h".to_owned(),
            port: 22,
            ordering: 0,
        }])
        .await
        .unwrap();
    store
        .grant(ResourcePermission {
            id: "g1".to_owned(),
            resource_type: "connection".to_owned(),
            resource_id: "c1".to_owned(),
            principal_type: PrincipalType::User,
            principal_id: "u2".to_owned(),
            permission_id: "connection.launch".to_owned(),
            expires_at: None,
            granted_by: "u1".to_owned(),
            granted_at: now,
        })
        .await
        .unwrap();

    store.delete_connection(&TxContext::new(), "c1").await.unwrap();

    assert!(store.targets_of("c1").await.unwrap().is_empty());
    let grants = store
        .grants_for("connection", "c1", &[(PrincipalType::User, "u2".to_owned())])
        .await
        .unwrap();
    assert!(grants.is_empty());
}

#[tokio::test]
async fn expired_share_is_still_listed_but_inactive() {
    let store = MemoryStore::new();
    let now = Utc::now();
    store
        .upsert_share(IdentityShare {
            id: "s1".to_owned(),
            identity_id: "i9".to_owned(),
            principal_type: PrincipalType::Team,
            principal_id: "team-a".to_owned(),
            permission: SharePermission::Use,
            expires_at: Some(now - Duration::minutes(1)),
            granted_by: "u1".to_owned(),
            granted_at: now - Duration::hours(1),
            revoked_at: None,
            revoked_by: None,
        })
        .await
        .unwrap();

    let shares = store.list_shares_for_identity("i9").await.unwrap();
    assert_eq!(shares.len(), 1);
    assert!(!shares[0].is_active(now));
}
