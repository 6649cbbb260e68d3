use crate::checker::Checker;
use crate::error::IamError;
use shellcn_domain::permission::{ResourcePermission, Role};
use shellcn_repository::{GrantRepo, RoleRepo};
use std::sync::Arc;
use tracing::info;

/// Role and grant administration.
///
/// All mutations funnel through here so the checker's caches are invalidated in
/// the same call that changes the underlying rows.
pub struct RoleAdmin {
    roles: Arc<dyn RoleRepo>,
    grants: Arc<dyn GrantRepo>,
    checker: Arc<Checker>,
}

impl std::fmt::Debug for RoleAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleAdmin").finish_non_exhaustive()
    }
}

impl RoleAdmin {
    #[must_use]
    pub fn new(
        roles: Arc<dyn RoleRepo>,
        grants: Arc<dyn GrantRepo>,
        checker: Arc<Checker>,
    ) -> Self {
        Self { roles, grants, checker }
    }

    /// # Errors
    /// Propagates repository errors (`AlreadyExists` on duplicate role ids).
    pub async fn create_role(&self, role: Role) -> Result<Role, IamError> {
        let created = self.roles.create_role(role).await?;
        self.checker.invalidate();
        Ok(created)
    }

    /// # Errors
    /// `Conflict` when the role is a system role.
    pub async fn update_role(&self, role: Role) -> Result<Role, IamError> {
        let updated = self.roles.update_role(role).await?;
        self.checker.invalidate();
        Ok(updated)
    }

    /// # Errors
    /// `NotFound` when the role does not exist.
    pub async fn assign_role(&self, user_id: &str, role_id: &str) -> Result<(), IamError> {
        self.roles.assign_role(user_id, role_id).await?;
        self.checker.invalidate();
        info!(user = user_id, role = role_id, "Role assigned");
        Ok(())
    }

    /// # Errors
    /// Propagates repository errors.
    pub async fn unassign_role(&self, user_id: &str, role_id: &str) -> Result<(), IamError> {
        self.roles.unassign_role(user_id, role_id).await?;
        self.checker.invalidate();
        Ok(())
    }

    /// # Errors
    /// Propagates repository errors.
    pub async fn grant_resource(
        &self,
        grant: ResourcePermission,
    ) -> Result<ResourcePermission, IamError> {
        let granted = self.grants.grant(grant).await?;
        self.checker.invalidate();
        Ok(granted)
    }

    /// # Errors
    /// `NotFound` when the grant does not exist.
    pub async fn revoke_resource(&self, grant_id: &str) -> Result<(), IamError> {
        self.grants.revoke_grant(grant_id).await?;
        self.checker.invalidate();
        Ok(())
    }
}
