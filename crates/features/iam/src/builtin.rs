use crate::error::IamError;
use crate::registry::PermissionRegistry;
use shellcn_domain::permission::{Permission, PermissionScope};

/// Registers the core permission set.
///
/// Protocol drivers register their own `protocol:<id>.*` permissions when they are
/// added to the driver registry.
///
/// # Errors
/// Returns [`IamError::AlreadyExists`] if called twice against the same registry.
pub fn register_builtin_permissions(registry: &PermissionRegistry) -> Result<(), IamError> {
    registry.register_all([
        Permission::new("user.manage", "users", "Manage users", PermissionScope::Global),
        Permission::new("role.manage", "iam", "Manage roles", PermissionScope::Global),
        Permission::new("vault.view", "vault", "View identities", PermissionScope::Global),
        Permission::new("vault.edit", "vault", "Edit identities", PermissionScope::Global)
            .depends_on(&["vault.view"])
            .implies(&["vault.view"]),
        Permission::new("vault.share", "vault", "Share identities", PermissionScope::Global)
            .depends_on(&["vault.view"]),
        Permission::new("vault.rotate", "vault", "Rotate the master key", PermissionScope::Global)
            .depends_on(&["vault.edit"]),
        Permission::new(
            "connection.manage",
            "connections",
            "Manage connections",
            PermissionScope::Resource,
        ),
        Permission::new(
            "connection.launch",
            "connections",
            "Launch connections",
            PermissionScope::Resource,
        ),
    ])
}

/// Builds the permission triple a protocol driver contributes for its id.
#[must_use]
pub fn protocol_permissions(protocol_id: &str) -> Vec<Permission> {
    let connect = format!("protocol:{protocol_id}.connect");
    let share = format!("protocol:{protocol_id}.share");
    let grant_write = format!("protocol:{protocol_id}.grant_write");

    vec![
        Permission::new(
            connect.clone(),
            format!("protocol:{protocol_id}"),
            format!("Connect over {protocol_id}"),
            PermissionScope::Resource,
        ),
        Permission::new(
            share.clone(),
            format!("protocol:{protocol_id}"),
            format!("Share live {protocol_id} sessions"),
            PermissionScope::Resource,
        )
        .depends_on(&[connect.as_str()]),
        Permission::new(
            grant_write,
            format!("protocol:{protocol_id}"),
            format!("Transfer write control in {protocol_id} sessions"),
            PermissionScope::Resource,
        )
        .depends_on(&[share.as_str()]),
    ]
}
