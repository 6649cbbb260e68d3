use crate::driver::Driver;
use crate::error::DriverError;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use shellcn_iam::{IamError, PermissionRegistry, protocol_permissions};
use std::sync::{Arc, OnceLock};
use tracing::info;

static GLOBAL: OnceLock<Arc<DriverRegistry>> = OnceLock::new();

/// The process-wide registry of protocol drivers, keyed by lowercase id.
///
/// Write-once per id during startup; lookups afterwards take a read lock only.
/// Registering a driver also contributes its protocol permissions to the IAM
/// registry so `protocol:<id>.*` checks resolve.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<FxHashMap<String, Arc<dyn Driver>>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.drivers.read().keys().cloned().collect();
        f.debug_struct("DriverRegistry").field("drivers", &ids).finish()
    }
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance used by application wiring.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Registers a driver under its descriptor id.
    ///
    /// # Errors
    /// * [`DriverError::AlreadyExists`] when the id was already registered.
    /// * [`DriverError::Internal`] if the permission registry rejects the
    ///   driver's permission set (double registration of the same protocol).
    pub fn register(
        &self,
        driver: Arc<dyn Driver>,
        permissions: &PermissionRegistry,
    ) -> Result<(), DriverError> {
        let id = driver.descriptor().id.to_lowercase();

        let mut drivers = self.drivers.write();
        if drivers.contains_key(&id) {
            return Err(DriverError::AlreadyExists { message: id.into(), context: None });
        }

        match permissions.register_all(protocol_permissions(&id)) {
            Ok(()) | Err(IamError::AlreadyExists { .. }) => {},
            Err(other) => {
                return Err(DriverError::Internal {
                    message: other.to_string().into(),
                    context: Some("Registering protocol permissions".into()),
                });
            },
        }

        info!(protocol = %id, "Protocol driver registered");
        drivers.insert(id, driver);
        Ok(())
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn get(&self, protocol_id: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.read().get(&protocol_id.to_lowercase()).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<String> {
        self.drivers.read().keys().cloned().collect()
    }

    /// Clears the registry. Unit suites only.
    #[cfg(any(test, feature = "test-util"))]
    pub fn reset(&self) {
        self.drivers.write().clear();
    }
}
