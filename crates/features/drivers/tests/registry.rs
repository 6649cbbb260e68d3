use shellcn_drivers::{AcceptAllVerifier, DriverError, DriverRegistry, SshDriver};
use shellcn_iam::PermissionRegistry;
use std::sync::Arc;

#[test]
fn registration_is_one_shot_per_id() {
    let drivers = DriverRegistry::new();
    let permissions = PermissionRegistry::new();
    let verifier = Arc::new(AcceptAllVerifier);

    drivers.register(Arc::new(SshDriver::new(verifier.clone())), &permissions).unwrap();

    let err = drivers
        .register(Arc::new(SshDriver::new(verifier.clone())), &permissions)
        .unwrap_err();
    assert!(matches!(err, DriverError::AlreadyExists { .. }));

    // The sftp variant is a distinct id and registers fine.
    drivers.register(Arc::new(SshDriver::sftp_only(verifier)), &permissions).unwrap();
    assert_eq!(drivers.list().len(), 2);
}

#[test]
fn registration_contributes_protocol_permissions() {
    let drivers = DriverRegistry::new();
    let permissions = PermissionRegistry::new();

    drivers
        .register(Arc::new(SshDriver::new(Arc::new(AcceptAllVerifier))), &permissions)
        .unwrap();

    for id in ["protocol:ssh.connect", "protocol:ssh.share", "protocol:ssh.grant_write"] {
        assert!(permissions.get(id).is_some(), "missing {id}");
    }

    // grant_write is gated on share, which is gated on connect.
    let share = permissions.get("protocol:ssh.share").unwrap();
    assert_eq!(share.depends_on, vec!["protocol:ssh.connect".to_owned()]);
}

#[test]
fn lookup_is_case_insensitive() {
    let drivers = DriverRegistry::new();
    let permissions = PermissionRegistry::new();
    drivers
        .register(Arc::new(SshDriver::new(Arc::new(AcceptAllVerifier))), &permissions)
        .unwrap();

    assert!(drivers.get("SSH").is_some());
    assert!(drivers.get("ssh").is_some());
    assert!(drivers.get("telnet").is_none());
}
