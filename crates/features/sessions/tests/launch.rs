mod support;

use chrono::Utc;
use serde_json::json;
use shellcn_domain::config::{RecordingConfig, RecordingMode};
use shellcn_domain::connection::{Connection, ConnectionTarget};
use shellcn_domain::identity::{IdentityScope, KdfSettings};
use shellcn_domain::user::User;
use shellcn_event_bus::EventBus;
use shellcn_iam::{Checker, PermissionRegistry, register_builtin_permissions};
use shellcn_repository::{ConnectionRepo, MemoryStore, TargetRepo, UserRepo};
use shellcn_sessions::{LaunchRequest, Launcher, SessionCoordinator, SessionError, SessionRecorder};
use shellcn_vault::{CreateIdentity, CredentialVault};
use shellcn_drivers::DriverRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use support::FakeDriver;

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
    driver: Arc<FakeDriver>,
    launcher: Launcher,
    coordinator: Arc<SessionCoordinator>,
}

async fn fixture(recording_dir: &std::path::Path) -> Fixture {
    let store = MemoryStore::new();
    let repo: Arc<MemoryStore> = Arc::new(store.clone());
    let registry = Arc::new(PermissionRegistry::new());
    register_builtin_permissions(&registry).unwrap();
    let checker = Arc::new(Checker::new(
        Arc::clone(&registry),
        repo.clone(),
        repo.clone(),
        repo.clone(),
    ));
    let events = EventBus::new();

    store.create_user(user("root", true)).await.unwrap();
    store.create_user(user("rival", true)).await.unwrap();

    let vault = Arc::new(CredentialVault::new(
        repo.clone(),
        repo.clone(),
        repo.clone(),
        repo.clone(),
        repo.clone(),
        Arc::clone(&checker),
        events.clone(),
        "operator-secret".to_owned(),
        KdfSettings {
            algorithm: "argon2id".to_owned(),
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        },
    ));

    let drivers = Arc::new(DriverRegistry::new());
    let driver = FakeDriver::new();
    drivers.register(driver.clone(), &registry).unwrap();

    let coordinator =
        Arc::new(SessionCoordinator::new(repo.clone(), events.clone(), false));
    let recorder = Arc::new(SessionRecorder::new(
        RecordingConfig {
            mode: RecordingMode::Disabled,
            require_consent: false,
            retention_days: None,
            dir: recording_dir.to_path_buf(),
        },
        repo.clone(),
    ));

    let launcher = Launcher::new(
        repo.clone(),
        repo.clone(),
        repo.clone(),
        checker,
        vault.clone(),
        drivers,
        Arc::clone(&coordinator),
        recorder,
        10,
    );

    // A connection owned by root, with a linked identity and one target.
    let identity = vault
        .create_identity("root", CreateIdentity {
            name: "box-identity".to_owned(),
            scope: IdentityScope::Global,
            team_id: None,
            connection_id: None,
            template: Some("ssh".to_owned()),
            metadata: BTreeMap::new(),
            payload: json!({
                "username": "tester",
                "auth_method": "password",
                "password": "secret",
            }),
        })
        .await
        .unwrap();

    let now = Utc::now();
    store
        .create_connection(Connection {
            id: "c1".to_owned(),
            name: "prod box".to_owned(),
            protocol_id: "ssh".to_owned(),
            owner_id: "root".to_owned(),
            team_id: None,
            settings: BTreeMap::new(),
            identity_id: Some(identity.id),
            concurrent_limit: Some(1),
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    store
        .set_targets("c1", vec![ConnectionTarget {
            id: "t1".to_owned(),
            connection_id: "c1".to_owned(),
            host: "10.0.0.5".to_owned(),
            port: 2222,
            ordering: 0,
        }])
        .await
        .unwrap();

    Fixture { store, driver, launcher, coordinator }
}

#[tokio::test]
async fn launch_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path()).await;

    let session = f
        .launcher
        .launch("root", LaunchRequest { connection_id: "c1".to_owned(), ..Default::default() })
        .await
        .unwrap();

    assert_eq!(session.connection_id, "c1");
    assert_eq!(session.host, "10.0.0.5");
    assert_eq!(session.port, 2222);
    assert_eq!(session.owner_id, "root");
    assert_eq!(session.write_holder.as_deref(), Some("root"));
    assert_eq!(session.concurrent_limit, 1);

    // The decrypted identity payload reached the driver as the secret.
    let secret = f.driver.last_secret.lock().clone().unwrap();
    assert_eq!(secret["username"], "tester");
    assert_eq!(secret["password"], "secret");

    // The session row was persisted.
    assert!(f.store.find_session(&session.id).await.is_ok());
}

#[tokio::test]
async fn protocol_mismatch_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path()).await;

    let err = f
        .launcher
        .launch("root", LaunchRequest {
            connection_id: "c1".to_owned(),
            protocol_id: Some("telnet".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::BadRequest { .. }));

    // Case-insensitive match is accepted.
    f.launcher
        .launch("root", LaunchRequest {
            connection_id: "c1".to_owned(),
            protocol_id: Some("SSH".to_owned()),
            ..Default::default()
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_connection_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path()).await;

    let err = f
        .launcher
        .launch("root", LaunchRequest { connection_id: "ghost".to_owned(), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFound { .. }));
}

#[tokio::test]
async fn limit_rejection_opens_no_transport() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path()).await;

    f.launcher
        .launch("root", LaunchRequest { connection_id: "c1".to_owned(), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(f.driver.launches.load(Ordering::Acquire), 1);

    // limit = 1: a second launch by another user is rejected before the driver
    // is ever invoked, and no row is persisted for it.
    let err = f
        .launcher
        .launch("rival", LaunchRequest { connection_id: "c1".to_owned(), ..Default::default() })
        .await
        .unwrap_err();
    match err {
        SessionError::ConcurrentLimitReached { limit, .. } => assert_eq!(limit, 1),
        other => panic!("expected ConcurrentLimitReached, got {other}"),
    }
    assert_eq!(f.driver.launches.load(Ordering::Acquire), 1, "no transport was opened");
}

#[tokio::test]
async fn closed_session_frees_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path()).await;

    let session = f
        .launcher
        .launch("root", LaunchRequest { connection_id: "c1".to_owned(), ..Default::default() })
        .await
        .unwrap();
    f.coordinator.close_session(&session.id, "done").await.unwrap();

    // Capacity is free again.
    f.launcher
        .launch("rival", LaunchRequest { connection_id: "c1".to_owned(), ..Default::default() })
        .await
        .unwrap();
}
