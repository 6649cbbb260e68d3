use chrono::Utc;
use shellcn_auth::{AuthError, LocalAuthenticator};
use shellcn_crypto::hash_password;
use shellcn_domain::config::LocalSettings;
use shellcn_domain::user::User;
use shellcn_repository::{MemoryStore, UserRepo};
use std::sync::Arc;

fn local_user(username: &str, password: &str, failed_attempts: u32) -> User {
    User {
        id: format!("user-{username}"),
        username: username.to_owned(),
        email: format!("{username}@example.com"),
        password_hash: Some(hash_password(password).unwrap()),
        is_root: false,
        is_active: true,
        failed_attempts,
        locked_until: None,
        mfa_secret: None,
        provider_type: None,
        external_subject: None,
        last_login_at: None,
        last_login_ip: None,
        created_at: Utc::now(),
    }
}

fn authenticator(store: &MemoryStore, threshold: u32) -> LocalAuthenticator {
    LocalAuthenticator::new(
        Arc::new(store.clone()),
        LocalSettings { registration_enabled: true, require_email_verification: false },
        threshold,
        15 * 60,
    )
}

#[tokio::test]
async fn happy_path_resets_counters_and_records_login() {
    let store = MemoryStore::new();
    store.create_user(local_user("alice", "password123", 3)).await.unwrap();
    let auth = authenticator(&store, 5);

    let user = auth.authenticate("alice", "password123", "127.0.0.1", "test-agent").await.unwrap();

    assert_eq!(user.failed_attempts, 0);
    assert!(user.locked_until.is_none());
    assert_eq!(user.last_login_ip.as_deref(), Some("127.0.0.1"));
    assert!(user.last_login_at.is_some());
}

#[tokio::test]
async fn lookup_is_case_insensitive_and_accepts_email() {
    let store = MemoryStore::new();
    store.create_user(local_user("alice", "password123", 0)).await.unwrap();
    let auth = authenticator(&store, 5);

    auth.authenticate("ALICE", "password123", "::1", "t").await.unwrap();
    auth.authenticate("alice@example.com", "password123", "::1", "t").await.unwrap();
}

#[tokio::test]
async fn threshold_locks_and_correct_password_stays_locked() {
    let store = MemoryStore::new();
    store.create_user(local_user("bob", "hunter2xx", 2)).await.unwrap();
    let auth = authenticator(&store, 3);

    // Attempt three reaches the threshold.
    let err = auth.authenticate("bob", "wrong", "10.0.0.1", "t").await.unwrap_err();
    assert!(matches!(err, AuthError::AccountLocked { .. }));

    let row = store.find_user("user-bob").await.unwrap();
    assert_eq!(row.failed_attempts, 3);
    assert!(row.locked_until.is_some_and(|until| until > Utc::now()));

    // The correct password inside the window is still rejected as locked.
    let err = auth.authenticate("bob", "hunter2xx", "10.0.0.1", "t").await.unwrap_err();
    assert!(matches!(err, AuthError::AccountLocked { .. }));
}

#[tokio::test]
async fn below_threshold_is_invalid_credentials() {
    let store = MemoryStore::new();
    store.create_user(local_user("carol", "pw-carol1", 0)).await.unwrap();
    let auth = authenticator(&store, 5);

    let err = auth.authenticate("carol", "nope", "::1", "t").await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials { .. }));
    assert_eq!(store.find_user("user-carol").await.unwrap().failed_attempts, 1);
}

#[tokio::test]
async fn disabled_account_rejected_before_password_check() {
    let store = MemoryStore::new();
    let mut user = local_user("dave", "pw-dave12", 0);
    user.is_active = false;
    store.create_user(user).await.unwrap();
    let auth = authenticator(&store, 5);

    // Even the correct password reports the account disabled.
    let err = auth.authenticate("dave", "pw-dave12", "::1", "t").await.unwrap_err();
    assert!(matches!(err, AuthError::AccountDisabled { .. }));
    // No failure accounting happened.
    assert_eq!(store.find_user("user-dave").await.unwrap().failed_attempts, 0);
}

#[tokio::test]
async fn unknown_identifier_is_invalid_credentials() {
    let store = MemoryStore::new();
    let auth = authenticator(&store, 5);
    let err = auth.authenticate("nobody", "pw", "::1", "t").await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials { .. }));
}

#[tokio::test]
async fn registration_honors_gates() {
    let store = MemoryStore::new();
    let auth = LocalAuthenticator::new(
        Arc::new(store.clone()),
        LocalSettings { registration_enabled: false, require_email_verification: false },
        5,
        900,
    );
    let err = auth.register("erin", "erin@example.com", "pw-erin99").await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidConfiguration { .. }));

    let auth = LocalAuthenticator::new(
        Arc::new(store.clone()),
        LocalSettings { registration_enabled: true, require_email_verification: true },
        5,
        900,
    );
    let user = auth.register("erin", "erin@example.com", "pw-erin99").await.unwrap();
    assert!(!user.is_active, "unverified accounts start disabled");
}
