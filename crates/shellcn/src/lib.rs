//! Facade crate for the ShellCN core.
//! Re-exports domain/kernel primitives and composes the feature slices into a
//! wired [`Core`]. Keep this crate thin: it composes other crates, it does not
//! implement business logic.
//!
//! ## Usage
//! ```rust,ignore
//! let store = Arc::new(MemoryStore::new());
//! let events = EventBus::new();
//! let core = shellcn::init(config, store, events).await?;
//! core.launcher.launch(actor, request).await?;
//! ```

pub use shellcn_domain as domain;
pub use shellcn_kernel as kernel;

pub mod features {
    pub use shellcn_auth as auth;
    pub use shellcn_drivers as drivers;
    pub use shellcn_iam as iam;
    pub use shellcn_sessions as sessions;
    pub use shellcn_vault as vault;
}

use shellcn_auth::{LdapAuthenticator, LocalAuthenticator, OidcProvider, ProviderRegistry, SamlProvider};
use shellcn_domain::config::{CoreConfig, ProviderSettings};
use shellcn_drivers::{AcceptAllVerifier, DriverRegistry, SshDriver};
use shellcn_event_bus::EventBus;
use shellcn_iam::{Checker, PermissionRegistry, RoleAdmin, register_builtin_permissions};
use shellcn_repository::MemoryStore;
use shellcn_sessions::{Launcher, SessionCoordinator, SessionRecorder};
use shellcn_vault::CredentialVault;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The wired core: registries populated, services constructed.
pub struct Core {
    pub config: CoreConfig,
    pub events: EventBus,
    pub checker: Arc<Checker>,
    pub roles: Arc<RoleAdmin>,
    pub vault: Arc<CredentialVault>,
    pub providers: Arc<ProviderRegistry>,
    pub local_auth: Arc<LocalAuthenticator>,
    pub coordinator: Arc<SessionCoordinator>,
    pub launcher: Arc<Launcher>,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core").finish_non_exhaustive()
    }
}

impl Core {
    /// Grace-bounded shutdown of everything holding live resources.
    pub async fn shutdown(&self) {
        let grace = Duration::from_secs(self.config.sessions.shutdown_grace_secs);
        self.coordinator.shutdown(grace).await;
        let closed = self.events.shutdown();
        info!(channels = closed, "Core shut down");
    }
}

/// Initialize the core against the default in-memory store.
///
/// Registers the built-in permission set and the SSH/SFTP drivers into the
/// process-wide registries, constructs the configured identity providers, and
/// wires the vault, coordinator, recorder, and launcher.
///
/// # Errors
/// Returns an error if any registry rejects a duplicate or a configured
/// provider fails validation/discovery.
pub async fn init(
    config: CoreConfig,
    store: Arc<MemoryStore>,
    events: EventBus,
) -> Result<Core, Box<dyn std::error::Error + Send + Sync>> {
    let permissions = PermissionRegistry::global();
    register_builtin_permissions(&permissions)?;

    let checker = Arc::new(Checker::new(
        Arc::clone(&permissions),
        store.clone(),
        store.clone(),
        store.clone(),
    ));

    let roles = Arc::new(RoleAdmin::new(store.clone(), store.clone(), Arc::clone(&checker)));

    let vault = Arc::new(CredentialVault::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::clone(&checker),
        events.clone(),
        config.vault.master_secret.clone(),
        config.vault.kdf.clone(),
    ));

    // Drivers register themselves and their protocol permissions.
    let drivers = DriverRegistry::global();
    let verifier = Arc::new(AcceptAllVerifier);
    drivers.register(Arc::new(SshDriver::new(verifier.clone())), &permissions)?;
    drivers.register(Arc::new(SshDriver::sftp_only(verifier)), &permissions)?;

    // Mirror the declared permission set into storage for introspection.
    for permission in permissions.list() {
        shellcn_repository::PermissionRepo::upsert_permission(store.as_ref(), permission).await?;
    }

    // Identity providers, per tagged configuration.
    let providers = Arc::new(ProviderRegistry::new());
    let mut local_settings = shellcn_domain::config::LocalSettings::default();
    for provider in &config.providers {
        match provider {
            ProviderSettings::Local(settings) => local_settings = settings.clone(),
            ProviderSettings::Oidc(settings) => {
                providers.register(Arc::new(OidcProvider::discover(settings.clone()).await?))?;
            },
            ProviderSettings::Saml(settings) => {
                providers.register(Arc::new(SamlProvider::new(settings.clone()).await?))?;
            },
            ProviderSettings::Ldap(settings) => {
                providers.register(Arc::new(LdapAuthenticator::new(settings.clone())?))?;
            },
        }
    }

    let local_auth = Arc::new(LocalAuthenticator::new(
        store.clone(),
        local_settings,
        config.auth.lockout_threshold,
        config.auth.lockout_duration_secs,
    ));

    let coordinator = Arc::new(SessionCoordinator::new(
        store.clone(),
        events.clone(),
        config.recording.require_consent,
    ));
    let recorder = Arc::new(SessionRecorder::new(config.recording.clone(), store.clone()));

    let launcher = Arc::new(Launcher::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::clone(&checker),
        Arc::clone(&vault),
        drivers,
        Arc::clone(&coordinator),
        recorder,
        config.sessions.default_concurrent_limit,
    ));

    info!("Core initialized");
    Ok(Core {
        config,
        events,
        checker,
        roles,
        vault,
        providers,
        local_auth,
        coordinator,
        launcher,
    })
}
