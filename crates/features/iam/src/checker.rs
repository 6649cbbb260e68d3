use crate::error::IamError;
use crate::registry::PermissionRegistry;
use chrono::Utc;
use fxhash::FxHashSet;
use moka::sync::Cache;
use shellcn_domain::identity::PrincipalType;
use shellcn_domain::permission::PermissionScope;
use shellcn_repository::{GrantRepo, RoleRepo, UserRepo};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const EFFECTIVE_SET_CACHE_CAPACITY: u64 = 10_000;

/// Reference to the resource a scoped permission is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef<'a> {
    pub resource_type: &'a str,
    pub resource_id: &'a str,
}

impl<'a> ResourceRef<'a> {
    #[must_use]
    pub const fn new(resource_type: &'a str, resource_id: &'a str) -> Self {
        Self { resource_type, resource_id }
    }
}

/// The access checker used on every privileged operation.
///
/// Safe for concurrent readers. Effective permission sets are cached per user and
/// keyed by a generation counter; any role or grant mutation calls
/// [`Checker::invalidate`] which bumps the generation and strands stale entries.
pub struct Checker {
    registry: Arc<PermissionRegistry>,
    users: Arc<dyn UserRepo>,
    roles: Arc<dyn RoleRepo>,
    grants: Arc<dyn GrantRepo>,
    cache: Cache<(String, u64), Arc<FxHashSet<String>>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for Checker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checker")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Checker {
    #[must_use]
    pub fn new(
        registry: Arc<PermissionRegistry>,
        users: Arc<dyn UserRepo>,
        roles: Arc<dyn RoleRepo>,
        grants: Arc<dyn GrantRepo>,
    ) -> Self {
        Self {
            registry,
            users,
            roles,
            grants,
            cache: Cache::new(EFFECTIVE_SET_CACHE_CAPACITY),
            generation: AtomicU64::new(0),
        }
    }

    /// Invalidate cached effective sets after a role or grant mutation.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Checks whether `user_id` may perform `permission_id`, optionally on a
    /// specific resource.
    ///
    /// # Errors
    /// Returns [`IamError::NotFound`] if the user does not exist, or
    /// [`IamError::Repository`] on storage failures. Denials are `Ok(false)`.
    pub async fn check(
        &self,
        user_id: &str,
        permission_id: &str,
        resource: Option<ResourceRef<'_>>,
    ) -> Result<bool, IamError> {
        let user = self.users.find_user(user_id).await?;

        // Root bypass applies before any registry lookup, so permissions registered
        // after the user row existed are still allowed.
        if user.is_root {
            return Ok(true);
        }

        let effective = self.effective_set(user_id).await?;
        if !effective.contains(permission_id) {
            debug!(user = user_id, permission = permission_id, "Permission not in effective set");
            return Ok(false);
        }

        let Some(definition) = self.registry.get(permission_id) else {
            // A role granted an id no module declared; without a scope there is
            // nothing to authorize against.
            debug!(user = user_id, permission = permission_id, "Permission not registered");
            return Ok(false);
        };

        if definition.scope == PermissionScope::Global {
            return Ok(true);
        }

        let Some(resource) = resource else {
            debug!(
                user = user_id,
                permission = permission_id,
                "Resource-scoped permission checked without a resource"
            );
            return Ok(false);
        };

        let mut principals = vec![(PrincipalType::User, user_id.to_owned())];
        for team in self.users.teams_of(user_id).await? {
            principals.push((PrincipalType::Team, team));
        }

        let now = Utc::now();
        let grants = self
            .grants
            .grants_for(resource.resource_type, resource.resource_id, &principals)
            .await?;
        Ok(grants.iter().any(|g| g.permission_id == permission_id && g.is_active(now)))
    }

    /// Check that errors with [`IamError::Forbidden`] instead of returning `false`.
    ///
    /// # Errors
    /// Everything [`Checker::check`] returns, plus [`IamError::Forbidden`] on denial.
    pub async fn require(
        &self,
        user_id: &str,
        permission_id: &str,
        resource: Option<ResourceRef<'_>>,
    ) -> Result<(), IamError> {
        if self.check(user_id, permission_id, resource).await? {
            Ok(())
        } else {
            Err(IamError::Forbidden {
                message: permission_id.to_owned().into(),
                context: None,
            })
        }
    }

    async fn effective_set(&self, user_id: &str) -> Result<Arc<FxHashSet<String>>, IamError> {
        let generation = self.generation.load(Ordering::Acquire);
        let key = (user_id.to_owned(), generation);

        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let roles = self.roles.roles_of(user_id).await?;
        let base = roles.into_iter().flat_map(|r| r.permissions);
        let set = Arc::new(self.registry.effective_closure(base));
        self.cache.insert(key, Arc::clone(&set));
        Ok(set)
    }
}
