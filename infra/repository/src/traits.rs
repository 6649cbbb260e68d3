use crate::error::RepoError;
use crate::tx::TxContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shellcn_domain::connection::{Connection, ConnectionTarget};
use shellcn_domain::identity::{
    CredentialVersion, Identity, IdentityShare, PrincipalType, VaultKeyMetadata,
};
use shellcn_domain::permission::{Permission, ResourcePermission, Role};
use shellcn_domain::session::{ActiveSession, SessionRecord};
use shellcn_domain::user::{ProviderType, User};

/// Account storage.
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Unique on id, username (case-insensitive) and email (case-insensitive).
    async fn create_user(&self, user: User) -> Result<User, RepoError>;

    async fn find_user(&self, id: &str) -> Result<User, RepoError>;

    /// Case-insensitive lookup by username **or** email.
    async fn find_user_by_login(&self, identifier: &str) -> Result<User, RepoError>;

    async fn find_user_by_external(
        &self,
        provider: ProviderType,
        subject: &str,
    ) -> Result<Option<User>, RepoError>;

    async fn update_user(&self, user: User) -> Result<User, RepoError>;

    /// Team ids the user belongs to.
    async fn teams_of(&self, user_id: &str) -> Result<Vec<String>, RepoError>;

    async fn add_team_member(&self, team_id: &str, user_id: &str) -> Result<(), RepoError>;
}

/// Vault identity storage.
#[async_trait]
pub trait IdentityRepo: Send + Sync {
    async fn create_identity(&self, identity: Identity) -> Result<Identity, RepoError>;

    async fn find_identity(&self, id: &str) -> Result<Identity, RepoError>;

    async fn list_identities(&self) -> Result<Vec<Identity>, RepoError>;

    async fn list_identities_for_owner(&self, owner_id: &str) -> Result<Vec<Identity>, RepoError>;

    /// Non-secret column updates (name, metadata, usage accounting).
    async fn update_identity(&self, identity: Identity) -> Result<Identity, RepoError>;

    /// Atomically inserts the history row and replaces the identity row.
    ///
    /// Fails with [`RepoError::AlreadyExists`] if a history row for
    /// `(identity, version)` is already present, leaving the identity untouched.
    async fn update_identity_secret(
        &self,
        tx: &TxContext,
        updated: Identity,
        history: CredentialVersion,
    ) -> Result<Identity, RepoError>;

    async fn delete_identity(&self, tx: &TxContext, id: &str) -> Result<(), RepoError>;
}

/// Append-only credential history.
#[async_trait]
pub trait CredentialVersionRepo: Send + Sync {
    async fn list_versions(&self, identity_id: &str) -> Result<Vec<CredentialVersion>, RepoError>;

    async fn find_version(
        &self,
        identity_id: &str,
        version: u32,
    ) -> Result<CredentialVersion, RepoError>;

    /// Replaces a history row's ciphertext during master-key rotation.
    ///
    /// The logical payload never changes; only the sealing key does.
    async fn reseal_version(
        &self,
        tx: &TxContext,
        identity_id: &str,
        version: u32,
        key_id: String,
        encrypted_payload: Vec<u8>,
    ) -> Result<(), RepoError>;
}

/// Identity share storage.
#[async_trait]
pub trait ShareRepo: Send + Sync {
    /// Upserts the single non-revoked row per (identity, principal type, principal id).
    async fn upsert_share(&self, share: IdentityShare) -> Result<IdentityShare, RepoError>;

    /// Soft-revokes the active share; rows are never deleted.
    async fn revoke_share(
        &self,
        identity_id: &str,
        principal_type: PrincipalType,
        principal_id: &str,
        revoked_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError>;

    async fn list_shares_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<IdentityShare>, RepoError>;
}

/// Master-key metadata storage.
#[async_trait]
pub trait KeyMetaRepo: Send + Sync {
    async fn active_key(&self) -> Result<Option<VaultKeyMetadata>, RepoError>;

    async fn find_key(&self, key_id: &str) -> Result<VaultKeyMetadata, RepoError>;

    async fn insert_key(&self, meta: VaultKeyMetadata) -> Result<VaultKeyMetadata, RepoError>;

    /// Marks `key_id` active and flips every other active row to inactive, in one
    /// atomic step (exactly one row is active at any time).
    async fn activate_key(&self, tx: &TxContext, key_id: &str) -> Result<(), RepoError>;
}

/// Persisted permission definitions (mirror of the in-process registry, for
/// introspection and UI listing).
#[async_trait]
pub trait PermissionRepo: Send + Sync {
    async fn upsert_permission(&self, permission: Permission) -> Result<(), RepoError>;

    async fn list_permissions(&self) -> Result<Vec<Permission>, RepoError>;
}

/// Role storage and user-role assignment.
#[async_trait]
pub trait RoleRepo: Send + Sync {
    async fn create_role(&self, role: Role) -> Result<Role, RepoError>;

    async fn find_role(&self, id: &str) -> Result<Role, RepoError>;

    /// Rejects mutation of system roles with [`RepoError::Conflict`].
    async fn update_role(&self, role: Role) -> Result<Role, RepoError>;

    async fn assign_role(&self, user_id: &str, role_id: &str) -> Result<(), RepoError>;

    async fn unassign_role(&self, user_id: &str, role_id: &str) -> Result<(), RepoError>;

    async fn roles_of(&self, user_id: &str) -> Result<Vec<Role>, RepoError>;
}

/// Direct per-resource grants.
#[async_trait]
pub trait GrantRepo: Send + Sync {
    async fn grant(&self, grant: ResourcePermission) -> Result<ResourcePermission, RepoError>;

    async fn revoke_grant(&self, id: &str) -> Result<(), RepoError>;

    /// Grants on `(resource_type, resource_id)` held by any of `principals`.
    async fn grants_for(
        &self,
        resource_type: &str,
        resource_id: &str,
        principals: &[(PrincipalType, String)],
    ) -> Result<Vec<ResourcePermission>, RepoError>;
}

/// Connection storage. Deleting a connection cascades its targets and grants.
#[async_trait]
pub trait ConnectionRepo: Send + Sync {
    async fn create_connection(&self, connection: Connection) -> Result<Connection, RepoError>;

    async fn find_connection(&self, id: &str) -> Result<Connection, RepoError>;

    async fn update_connection(&self, connection: Connection) -> Result<Connection, RepoError>;

    async fn delete_connection(&self, tx: &TxContext, id: &str) -> Result<(), RepoError>;
}

/// Connection target storage.
#[async_trait]
pub trait TargetRepo: Send + Sync {
    async fn set_targets(
        &self,
        connection_id: &str,
        targets: Vec<ConnectionTarget>,
    ) -> Result<(), RepoError>;

    /// Targets ordered by their `ordering` column.
    async fn targets_of(&self, connection_id: &str) -> Result<Vec<ConnectionTarget>, RepoError>;
}

/// Filter for session listings.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub connection_id: Option<String>,
    pub owner_id: Option<String>,
    pub include_closed: bool,
}

/// Persisted session rows.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn insert_session(&self, session: ActiveSession) -> Result<ActiveSession, RepoError>;

    async fn update_session(&self, session: ActiveSession) -> Result<ActiveSession, RepoError>;

    async fn find_session(&self, id: &str) -> Result<ActiveSession, RepoError>;

    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<ActiveSession>, RepoError>;
}

/// Recording metadata rows.
#[async_trait]
pub trait RecordRepo: Send + Sync {
    async fn insert_record(&self, record: SessionRecord) -> Result<SessionRecord, RepoError>;

    async fn find_record(&self, id: &str) -> Result<SessionRecord, RepoError>;

    async fn list_records_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionRecord>, RepoError>;

    /// Unprotected records whose retention has lapsed.
    async fn list_expired_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, RepoError>;

    async fn delete_record(&self, id: &str) -> Result<(), RepoError>;
}
