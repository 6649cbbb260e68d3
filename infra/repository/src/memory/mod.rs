//! The in-memory store.
//!
//! Every repository trait implemented over one set of `parking_lot`-guarded maps.
//! Transactional methods take the write lock once and apply all of their writes
//! inside it, so readers observe either none or all of a transaction.

use crate::error::RepoError;
use crate::traits::{
    ConnectionRepo, CredentialVersionRepo, GrantRepo, IdentityRepo, KeyMetaRepo, PermissionRepo,
    RecordRepo, RoleRepo, SessionFilter, SessionRepo, ShareRepo, TargetRepo, UserRepo,
};
use crate::tx::TxContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use shellcn_domain::connection::{Connection, ConnectionTarget};
use shellcn_domain::identity::{
    CredentialVersion, Identity, IdentityShare, PrincipalType, VaultKeyMetadata,
};
use shellcn_domain::permission::{Permission, ResourcePermission, Role};
use shellcn_domain::session::{ActiveSession, SessionRecord};
use shellcn_domain::user::{ProviderType, User};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Default)]
struct StoreInner {
    users: FxHashMap<String, User>,
    team_members: FxHashMap<String, Vec<String>>,
    identities: FxHashMap<String, Identity>,
    versions: FxHashMap<(String, u32), CredentialVersion>,
    shares: Vec<IdentityShare>,
    keys: FxHashMap<String, VaultKeyMetadata>,
    permissions: FxHashMap<String, Permission>,
    roles: FxHashMap<String, Role>,
    role_assignments: FxHashMap<String, Vec<String>>,
    grants: FxHashMap<String, ResourcePermission>,
    connections: FxHashMap<String, Connection>,
    targets: FxHashMap<String, Vec<ConnectionTarget>>,
    sessions: FxHashMap<String, ActiveSession>,
    records: FxHashMap<String, SessionRecord>,
}

/// A process-local backing store implementing every repository trait.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn create_user(&self, user: User) -> Result<User, RepoError> {
        let mut inner = self.inner.write();
        if inner.users.contains_key(&user.id) {
            return Err(RepoError::already_exists("user", &user.id));
        }
        let username = user.username.to_lowercase();
        let email = user.email.to_lowercase();
        if inner.users.values().any(|u| {
            u.username.to_lowercase() == username || u.email.to_lowercase() == email
        }) {
            return Err(RepoError::already_exists("user", &user.username));
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: &str) -> Result<User, RepoError> {
        self.inner
            .read()
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("user", id))
    }

    async fn find_user_by_login(&self, identifier: &str) -> Result<User, RepoError> {
        let needle = identifier.to_lowercase();
        self.inner
            .read()
            .users
            .values()
            .find(|u| u.username.to_lowercase() == needle || u.email.to_lowercase() == needle)
            .cloned()
            .ok_or_else(|| RepoError::not_found("user", identifier))
    }

    async fn find_user_by_external(
        &self,
        provider: ProviderType,
        subject: &str,
    ) -> Result<Option<User>, RepoError> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| {
                u.provider_type == Some(provider) && u.external_subject.as_deref() == Some(subject)
            })
            .cloned())
    }

    async fn update_user(&self, user: User) -> Result<User, RepoError> {
        let mut inner = self.inner.write();
        if !inner.users.contains_key(&user.id) {
            return Err(RepoError::not_found("user", &user.id));
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn teams_of(&self, user_id: &str) -> Result<Vec<String>, RepoError> {
        let inner = self.inner.read();
        Ok(inner
            .team_members
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == user_id))
            .map(|(team, _)| team.clone())
            .collect())
    }

    async fn add_team_member(&self, team_id: &str, user_id: &str) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        let members = inner.team_members.entry(team_id.to_owned()).or_default();
        if !members.iter().any(|m| m == user_id) {
            members.push(user_id.to_owned());
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityRepo for MemoryStore {
    async fn create_identity(&self, identity: Identity) -> Result<Identity, RepoError> {
        let mut inner = self.inner.write();
        if inner.identities.contains_key(&identity.id) {
            return Err(RepoError::already_exists("identity", &identity.id));
        }
        inner.identities.insert(identity.id.clone(), identity.clone());
        Ok(identity)
    }

    async fn find_identity(&self, id: &str) -> Result<Identity, RepoError> {
        self.inner
            .read()
            .identities
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("identity", id))
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, RepoError> {
        Ok(self.inner.read().identities.values().cloned().collect())
    }

    async fn list_identities_for_owner(&self, owner_id: &str) -> Result<Vec<Identity>, RepoError> {
        Ok(self
            .inner
            .read()
            .identities
            .values()
            .filter(|i| i.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn update_identity(&self, identity: Identity) -> Result<Identity, RepoError> {
        let mut inner = self.inner.write();
        if !inner.identities.contains_key(&identity.id) {
            return Err(RepoError::not_found("identity", &identity.id));
        }
        inner.identities.insert(identity.id.clone(), identity.clone());
        Ok(identity)
    }

    async fn update_identity_secret(
        &self,
        tx: &TxContext,
        updated: Identity,
        history: CredentialVersion,
    ) -> Result<Identity, RepoError> {
        trace!(tx = tx.id(), identity = %updated.id, "Updating identity secret");
        let mut inner = self.inner.write();
        if !inner.identities.contains_key(&updated.id) {
            return Err(RepoError::not_found("identity", &updated.id));
        }
        let key = (history.identity_id.clone(), history.version);
        if inner.versions.contains_key(&key) {
            return Err(RepoError::already_exists(
                "credential_version",
                &format!("{}:{}", key.0, key.1),
            ));
        }
        inner.versions.insert(key, history);
        inner.identities.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete_identity(&self, tx: &TxContext, id: &str) -> Result<(), RepoError> {
        trace!(tx = tx.id(), identity = id, "Deleting identity");
        let mut inner = self.inner.write();
        if inner.identities.remove(id).is_none() {
            return Err(RepoError::not_found("identity", id));
        }
        inner.versions.retain(|(identity_id, _), _| identity_id != id);
        inner.shares.retain(|s| s.identity_id != id);
        Ok(())
    }
}

#[async_trait]
impl CredentialVersionRepo for MemoryStore {
    async fn list_versions(&self, identity_id: &str) -> Result<Vec<CredentialVersion>, RepoError> {
        let mut versions: Vec<CredentialVersion> = self
            .inner
            .read()
            .versions
            .values()
            .filter(|v| v.identity_id == identity_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    async fn find_version(
        &self,
        identity_id: &str,
        version: u32,
    ) -> Result<CredentialVersion, RepoError> {
        self.inner
            .read()
            .versions
            .get(&(identity_id.to_owned(), version))
            .cloned()
            .ok_or_else(|| RepoError::not_found("credential_version", identity_id))
    }

    async fn reseal_version(
        &self,
        tx: &TxContext,
        identity_id: &str,
        version: u32,
        key_id: String,
        encrypted_payload: Vec<u8>,
    ) -> Result<(), RepoError> {
        trace!(tx = tx.id(), identity = identity_id, version, "Resealing credential version");
        let mut inner = self.inner.write();
        let row = inner
            .versions
            .get_mut(&(identity_id.to_owned(), version))
            .ok_or_else(|| RepoError::not_found("credential_version", identity_id))?;
        row.key_id = key_id;
        row.encrypted_payload = encrypted_payload;
        Ok(())
    }
}

#[async_trait]
impl ShareRepo for MemoryStore {
    async fn upsert_share(&self, share: IdentityShare) -> Result<IdentityShare, RepoError> {
        let mut inner = self.inner.write();
        let existing = inner.shares.iter_mut().find(|s| {
            s.identity_id == share.identity_id
                && s.principal_type == share.principal_type
                && s.principal_id == share.principal_id
                && s.revoked_at.is_none()
        });
        match existing {
            Some(row) => {
                row.permission = share.permission;
                row.expires_at = share.expires_at;
                row.granted_by = share.granted_by.clone();
                row.granted_at = share.granted_at;
                Ok(row.clone())
            },
            None => {
                inner.shares.push(share.clone());
                Ok(share)
            },
        }
    }

    async fn revoke_share(
        &self,
        identity_id: &str,
        principal_type: PrincipalType,
        principal_id: &str,
        revoked_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        let row = inner
            .shares
            .iter_mut()
            .find(|s| {
                s.identity_id == identity_id
                    && s.principal_type == principal_type
                    && s.principal_id == principal_id
                    && s.revoked_at.is_none()
            })
            .ok_or_else(|| RepoError::not_found("identity_share", identity_id))?;
        row.revoked_at = Some(at);
        row.revoked_by = Some(revoked_by.to_owned());
        Ok(())
    }

    async fn list_shares_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<IdentityShare>, RepoError> {
        Ok(self
            .inner
            .read()
            .shares
            .iter()
            .filter(|s| s.identity_id == identity_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl KeyMetaRepo for MemoryStore {
    async fn active_key(&self) -> Result<Option<VaultKeyMetadata>, RepoError> {
        Ok(self.inner.read().keys.values().find(|k| k.active).cloned())
    }

    async fn find_key(&self, key_id: &str) -> Result<VaultKeyMetadata, RepoError> {
        self.inner
            .read()
            .keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("vault_key", key_id))
    }

    async fn insert_key(&self, meta: VaultKeyMetadata) -> Result<VaultKeyMetadata, RepoError> {
        let mut inner = self.inner.write();
        if inner.keys.contains_key(&meta.key_id) {
            return Err(RepoError::already_exists("vault_key", &meta.key_id));
        }
        inner.keys.insert(meta.key_id.clone(), meta.clone());
        Ok(meta)
    }

    async fn activate_key(&self, tx: &TxContext, key_id: &str) -> Result<(), RepoError> {
        trace!(tx = tx.id(), key_id, "Activating vault key");
        let mut inner = self.inner.write();
        if !inner.keys.contains_key(key_id) {
            return Err(RepoError::not_found("vault_key", key_id));
        }
        let now = Utc::now();
        for key in inner.keys.values_mut() {
            if key.active && key.key_id != key_id {
                key.active = false;
                key.rotated_at = Some(now);
            }
        }
        if let Some(key) = inner.keys.get_mut(key_id) {
            key.active = true;
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionRepo for MemoryStore {
    async fn upsert_permission(&self, permission: Permission) -> Result<(), RepoError> {
        self.inner.write().permissions.insert(permission.id.clone(), permission);
        Ok(())
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, RepoError> {
        Ok(self.inner.read().permissions.values().cloned().collect())
    }
}

#[async_trait]
impl RoleRepo for MemoryStore {
    async fn create_role(&self, role: Role) -> Result<Role, RepoError> {
        let mut inner = self.inner.write();
        if inner.roles.contains_key(&role.id) {
            return Err(RepoError::already_exists("role", &role.id));
        }
        inner.roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    async fn find_role(&self, id: &str) -> Result<Role, RepoError> {
        self.inner.read().roles.get(id).cloned().ok_or_else(|| RepoError::not_found("role", id))
    }

    async fn update_role(&self, role: Role) -> Result<Role, RepoError> {
        let mut inner = self.inner.write();
        let existing =
            inner.roles.get(&role.id).ok_or_else(|| RepoError::not_found("role", &role.id))?;
        if existing.is_system {
            return Err(RepoError::Conflict {
                message: "System roles are immutable".into(),
                context: Some(role.id.clone().into()),
            });
        }
        inner.roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    async fn assign_role(&self, user_id: &str, role_id: &str) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        if !inner.roles.contains_key(role_id) {
            return Err(RepoError::not_found("role", role_id));
        }
        let assigned = inner.role_assignments.entry(user_id.to_owned()).or_default();
        if !assigned.iter().any(|r| r == role_id) {
            assigned.push(role_id.to_owned());
        }
        Ok(())
    }

    async fn unassign_role(&self, user_id: &str, role_id: &str) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        if let Some(assigned) = inner.role_assignments.get_mut(user_id) {
            assigned.retain(|r| r != role_id);
        }
        Ok(())
    }

    async fn roles_of(&self, user_id: &str) -> Result<Vec<Role>, RepoError> {
        let inner = self.inner.read();
        Ok(inner
            .role_assignments
            .get(user_id)
            .map(|ids| ids.iter().filter_map(|id| inner.roles.get(id).cloned()).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl GrantRepo for MemoryStore {
    async fn grant(&self, grant: ResourcePermission) -> Result<ResourcePermission, RepoError> {
        let mut inner = self.inner.write();
        if inner.grants.contains_key(&grant.id) {
            return Err(RepoError::already_exists("resource_permission", &grant.id));
        }
        inner.grants.insert(grant.id.clone(), grant.clone());
        Ok(grant)
    }

    async fn revoke_grant(&self, id: &str) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        inner
            .grants
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepoError::not_found("resource_permission", id))
    }

    async fn grants_for(
        &self,
        resource_type: &str,
        resource_id: &str,
        principals: &[(PrincipalType, String)],
    ) -> Result<Vec<ResourcePermission>, RepoError> {
        Ok(self
            .inner
            .read()
            .grants
            .values()
            .filter(|g| {
                g.resource_type == resource_type
                    && g.resource_id == resource_id
                    && principals
                        .iter()
                        .any(|(pt, pid)| g.principal_type == *pt && g.principal_id == *pid)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConnectionRepo for MemoryStore {
    async fn create_connection(&self, connection: Connection) -> Result<Connection, RepoError> {
        let mut inner = self.inner.write();
        if inner.connections.contains_key(&connection.id) {
            return Err(RepoError::already_exists("connection", &connection.id));
        }
        inner.connections.insert(connection.id.clone(), connection.clone());
        Ok(connection)
    }

    async fn find_connection(&self, id: &str) -> Result<Connection, RepoError> {
        self.inner
            .read()
            .connections
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("connection", id))
    }

    async fn update_connection(&self, connection: Connection) -> Result<Connection, RepoError> {
        let mut inner = self.inner.write();
        if !inner.connections.contains_key(&connection.id) {
            return Err(RepoError::not_found("connection", &connection.id));
        }
        inner.connections.insert(connection.id.clone(), connection.clone());
        Ok(connection)
    }

    async fn delete_connection(&self, tx: &TxContext, id: &str) -> Result<(), RepoError> {
        trace!(tx = tx.id(), connection = id, "Deleting connection with cascades");
        let mut inner = self.inner.write();
        if inner.connections.remove(id).is_none() {
            return Err(RepoError::not_found("connection", id));
        }
        inner.targets.remove(id);
        inner.grants.retain(|_, g| !(g.resource_type == "connection" && g.resource_id == id));
        Ok(())
    }
}

#[async_trait]
impl TargetRepo for MemoryStore {
    async fn set_targets(
        &self,
        connection_id: &str,
        mut targets: Vec<ConnectionTarget>,
    ) -> Result<(), RepoError> {
        targets.sort_by_key(|t| t.ordering);
        self.inner.write().targets.insert(connection_id.to_owned(), targets);
        Ok(())
    }

    async fn targets_of(&self, connection_id: &str) -> Result<Vec<ConnectionTarget>, RepoError> {
        Ok(self.inner.read().targets.get(connection_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl SessionRepo for MemoryStore {
    async fn insert_session(&self, session: ActiveSession) -> Result<ActiveSession, RepoError> {
        let mut inner = self.inner.write();
        if inner.sessions.contains_key(&session.id) {
            return Err(RepoError::already_exists("session", &session.id));
        }
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn update_session(&self, session: ActiveSession) -> Result<ActiveSession, RepoError> {
        let mut inner = self.inner.write();
        if !inner.sessions.contains_key(&session.id) {
            return Err(RepoError::not_found("session", &session.id));
        }
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn find_session(&self, id: &str) -> Result<ActiveSession, RepoError> {
        self.inner
            .read()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("session", id))
    }

    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<ActiveSession>, RepoError> {
        Ok(self
            .inner
            .read()
            .sessions
            .values()
            .filter(|s| filter.include_closed || !s.is_closed())
            .filter(|s| {
                filter.connection_id.as_deref().is_none_or(|c| s.connection_id == c)
                    && filter.owner_id.as_deref().is_none_or(|o| s.owner_id == o)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecordRepo for MemoryStore {
    async fn insert_record(&self, record: SessionRecord) -> Result<SessionRecord, RepoError> {
        let mut inner = self.inner.write();
        if inner.records.contains_key(&record.id) {
            return Err(RepoError::already_exists("session_record", &record.id));
        }
        inner.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn find_record(&self, id: &str) -> Result<SessionRecord, RepoError> {
        self.inner
            .read()
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::not_found("session_record", id))
    }

    async fn list_records_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionRecord>, RepoError> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_expired_records(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, RepoError> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|r| !r.protected && r.retention_until.is_some_and(|until| until <= now))
            .cloned()
            .collect())
    }

    async fn delete_record(&self, id: &str) -> Result<(), RepoError> {
        let mut inner = self.inner.write();
        inner.records.remove(id).map(|_| ()).ok_or_else(|| RepoError::not_found("session_record", id))
    }
}
