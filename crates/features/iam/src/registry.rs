use crate::error::IamError;
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::RwLock;
use shellcn_domain::permission::Permission;
use std::sync::{Arc, OnceLock};
use tracing::debug;

static GLOBAL: OnceLock<Arc<PermissionRegistry>> = OnceLock::new();

/// The process-wide registry of declared permissions.
///
/// Written only during startup; safe for concurrent reads afterwards. Duplicate
/// ids fail fast so a mis-wired module is caught at boot, not at check time.
/// Unit suites construct their own instances with [`PermissionRegistry::new`].
#[derive(Debug, Default)]
pub struct PermissionRegistry {
    permissions: RwLock<FxHashMap<String, Permission>>,
}

impl PermissionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance used by application wiring.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Registers a permission.
    ///
    /// # Errors
    /// Returns [`IamError::AlreadyExists`] when the dotted id was already registered.
    pub fn register(&self, permission: Permission) -> Result<(), IamError> {
        let mut permissions = self.permissions.write();
        if permissions.contains_key(&permission.id) {
            return Err(IamError::AlreadyExists {
                message: permission.id.clone().into(),
                context: Some(permission.module.clone().into()),
            });
        }
        debug!(permission = %permission.id, module = %permission.module, "Permission registered");
        permissions.insert(permission.id.clone(), permission);
        Ok(())
    }

    /// Registers a batch, failing on the first duplicate.
    ///
    /// # Errors
    /// Returns [`IamError::AlreadyExists`] for the first duplicate id.
    pub fn register_all(
        &self,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Result<(), IamError> {
        for permission in permissions {
            self.register(permission)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Permission> {
        self.permissions.read().get(id).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Permission> {
        self.permissions.read().values().cloned().collect()
    }

    /// Closes `base` under `implies`, then prunes entries whose `depends_on`
    /// prerequisites are not themselves in the set (to a fixpoint, since removals
    /// can cascade).
    ///
    /// Ids unknown to the registry survive the closure untouched: a role may be
    /// provisioned before the module that declares its permissions.
    #[must_use]
    pub fn effective_closure(
        &self,
        base: impl IntoIterator<Item = String>,
    ) -> FxHashSet<String> {
        let permissions = self.permissions.read();

        let mut set: FxHashSet<String> = FxHashSet::default();
        let mut queue: Vec<String> = base.into_iter().collect();
        while let Some(id) = queue.pop() {
            if !set.insert(id.clone()) {
                continue;
            }
            if let Some(def) = permissions.get(&id) {
                queue.extend(def.implies.iter().cloned());
            }
        }

        // depends_on gates effectiveness; it never grants.
        loop {
            let unmet: Vec<String> = set
                .iter()
                .filter(|id| {
                    permissions
                        .get(*id)
                        .is_some_and(|def| def.depends_on.iter().any(|dep| !set.contains(dep)))
                })
                .cloned()
                .collect();
            if unmet.is_empty() {
                break;
            }
            for id in unmet {
                set.remove(&id);
            }
        }

        set
    }

    /// Clears the registry. Unit suites only; production wiring registers once.
    #[cfg(any(test, feature = "test-util"))]
    pub fn reset(&self) {
        self.permissions.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellcn_domain::permission::PermissionScope;

    fn perm(id: &str) -> Permission {
        Permission::new(id, "test", id, PermissionScope::Global)
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = PermissionRegistry::new();
        registry.register(perm("a.one")).unwrap();
        let err = registry.register(perm("a.one")).unwrap_err();
        assert!(matches!(err, IamError::AlreadyExists { .. }));
    }

    #[test]
    fn closure_follows_implies_transitively() {
        let registry = PermissionRegistry::new();
        registry.register(perm("a.top").implies(&["a.mid"])).unwrap();
        registry.register(perm("a.mid").implies(&["a.leaf"])).unwrap();
        registry.register(perm("a.leaf")).unwrap();

        let set = registry.effective_closure(["a.top".to_owned()]);
        assert!(set.contains("a.top") && set.contains("a.mid") && set.contains("a.leaf"));
    }

    #[test]
    fn depends_on_is_not_granted_and_gates_effectiveness() {
        let registry = PermissionRegistry::new();
        registry.register(perm("vault.view")).unwrap();
        registry.register(perm("vault.share").depends_on(&["vault.view"])).unwrap();

        // Holding only the dependent permission yields nothing effective.
        let set = registry.effective_closure(["vault.share".to_owned()]);
        assert!(!set.contains("vault.share"));
        assert!(!set.contains("vault.view"));

        // Holding both makes the dependent one effective.
        let set =
            registry.effective_closure(["vault.share".to_owned(), "vault.view".to_owned()]);
        assert!(set.contains("vault.share"));
    }

    #[test]
    fn cascading_depends_on_prune() {
        let registry = PermissionRegistry::new();
        registry.register(perm("p.base")).unwrap();
        registry.register(perm("p.a").depends_on(&["p.base"])).unwrap();
        registry.register(perm("p.b").depends_on(&["p.a"])).unwrap();

        // Without p.base, p.a falls; with p.a gone, p.b falls too.
        let set = registry.effective_closure(["p.a".to_owned(), "p.b".to_owned()]);
        assert!(set.is_empty());
    }
}
