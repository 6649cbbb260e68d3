use crate::error::AuthError;
use crate::identity::Provider;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use shellcn_domain::user::ProviderType;
use std::sync::Arc;
use tracing::info;

/// Registry of configured identity providers, keyed by provider type.
///
/// Registration is one-shot per type; duplicates fail at startup.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<FxHashMap<ProviderType, Arc<dyn Provider>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<ProviderType> = self.providers.read().keys().copied().collect();
        f.debug_struct("ProviderRegistry").field("providers", &types).finish()
    }
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider.
    ///
    /// # Errors
    /// Returns [`AuthError::ProviderExists`] if the type is already registered.
    pub fn register(&self, provider: Arc<dyn Provider>) -> Result<(), AuthError> {
        let provider_type = provider.metadata().provider_type;
        let mut providers = self.providers.write();
        if providers.contains_key(&provider_type) {
            return Err(AuthError::ProviderExists {
                message: provider_type.to_string().into(),
                context: None,
            });
        }
        info!(provider = %provider_type, "Identity provider registered");
        providers.insert(provider_type, provider);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, provider_type: ProviderType) -> Option<Arc<dyn Provider>> {
        self.providers.read().get(&provider_type).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<ProviderType> {
        self.providers.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{
        BeginRequest, BeginResponse, CallbackRequest, ExternalIdentity, ProviderMetadata,
    };
    use async_trait::async_trait;

    struct StubProvider(ProviderType);

    #[async_trait]
    impl Provider for StubProvider {
        fn metadata(&self) -> ProviderMetadata {
            ProviderMetadata { provider_type: self.0, display_name: "stub".to_owned() }
        }

        async fn begin(&self, _req: BeginRequest) -> Result<BeginResponse, AuthError> {
            Ok(BeginResponse { redirect_url: "https://idp.example".to_owned(), request_id: None })
        }

        async fn callback(&self, _req: CallbackRequest) -> Result<ExternalIdentity, AuthError> {
            Err(AuthError::Internal { message: "stub".into(), context: None })
        }

        async fn test(&self) -> Result<(), AuthError> {
            Ok(())
        }
    }

    #[test]
    fn duplicate_provider_type_is_rejected() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider(ProviderType::Oidc))).unwrap();

        let err = registry.register(Arc::new(StubProvider(ProviderType::Oidc))).unwrap_err();
        assert!(matches!(err, AuthError::ProviderExists { .. }));

        // A different type still registers fine.
        registry.register(Arc::new(StubProvider(ProviderType::Saml))).unwrap();
        assert_eq!(registry.list().len(), 2);
    }
}
