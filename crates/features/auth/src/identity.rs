use crate::error::AuthError;
use async_trait::async_trait;
use chrono::Utc;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use shellcn_domain::user::{ProviderType, User};
use shellcn_kernel::safe_nanoid;
use shellcn_repository::UserRepo;
use tracing::info;

/// The normalized identity every provider resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub provider: ProviderType,
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub groups: Vec<String>,
    /// Raw provider claims/attributes, for audit trails and custom mappings.
    pub raw_claims: serde_json::Value,
}

/// Static description of a registered provider.
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub provider_type: ProviderType,
    pub display_name: String,
}

/// Caller-supplied inputs for a redirect-based flow.
///
/// `state`, `nonce`, and the PKCE challenge are generated by the HTTP adapter and
/// held in its flow store; providers only weave them into the redirect.
#[derive(Debug, Clone, Default)]
pub struct BeginRequest {
    pub state: String,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub prompt: Option<String>,
}

/// Where to send the browser, plus the request id to verify on callback (SAML).
#[derive(Debug, Clone)]
pub struct BeginResponse {
    pub redirect_url: String,
    pub request_id: Option<String>,
}

/// The callback carried back by the browser.
#[derive(Debug, Clone, Default)]
pub struct CallbackRequest {
    /// Query parameters (OIDC: `code`, `state`, `error`).
    pub query: FxHashMap<String, String>,
    /// POSTed form fields (SAML: `SAMLResponse`, `RelayState`).
    pub form: FxHashMap<String, String>,
    /// PKCE verifier matching the challenge given to `begin`.
    pub code_verifier: Option<String>,
    /// Nonce expected inside the ID token.
    pub expected_nonce: Option<String>,
    /// AuthnRequest id returned by `begin` (SAML InResponseTo check).
    pub request_id: Option<String>,
}

/// A pluggable identity provider.
#[async_trait]
pub trait Provider: Send + Sync {
    fn metadata(&self) -> ProviderMetadata;

    /// Starts a redirect-based flow.
    async fn begin(&self, req: BeginRequest) -> Result<BeginResponse, AuthError>;

    /// Consumes the browser callback and resolves the normalized identity.
    async fn callback(&self, req: CallbackRequest) -> Result<ExternalIdentity, AuthError>;

    /// Cheap reachability/configuration check for admin diagnostics.
    async fn test(&self) -> Result<(), AuthError>;
}

/// Finds or creates the local user row for an externally authenticated identity.
///
/// Keyed by `(provider_type, external_subject)`. If an account with the same
/// email already exists but is bound to a different provider (or is a local
/// password account), linking is refused.
///
/// # Errors
/// * [`AuthError::ProviderMismatch`] on cross-provider rebinding.
/// * [`AuthError::AccountDisabled`] when the linked account is disabled.
pub async fn link_external_identity(
    users: &dyn UserRepo,
    identity: &ExternalIdentity,
) -> Result<User, AuthError> {
    if let Some(user) = users.find_user_by_external(identity.provider, &identity.subject).await? {
        if !user.is_active {
            return Err(AuthError::AccountDisabled { context: None });
        }
        return Ok(user);
    }

    // A user with this email may exist from another provider or local signup.
    if let Some(email) = &identity.email
        && let Ok(existing) = users.find_user_by_login(email).await
    {
        return Err(AuthError::ProviderMismatch {
            message: format!(
                "Account is linked to '{}'",
                existing
                    .provider_type
                    .map_or_else(|| "local".to_owned(), |p| p.to_string())
            )
            .into(),
            context: None,
        });
    }

    let username = identity
        .email
        .as_deref()
        .and_then(|e| e.split('@').next())
        .filter(|s| !s.is_empty())
        .map_or_else(|| format!("{}-{}", identity.provider, safe_nanoid!(6)), str::to_owned);

    let user = User {
        id: safe_nanoid!(),
        username,
        email: identity
            .email
            .clone()
            .unwrap_or_else(|| format!("{}@{}.invalid", identity.subject, identity.provider)),
        password_hash: None,
        is_root: false,
        is_active: true,
        failed_attempts: 0,
        locked_until: None,
        mfa_secret: None,
        provider_type: Some(identity.provider),
        external_subject: Some(identity.subject.clone()),
        last_login_at: Some(Utc::now()),
        last_login_ip: None,
        created_at: Utc::now(),
    };

    let user = users.create_user(user).await?;
    info!(user = %user.id, provider = %identity.provider, "User provisioned from external identity");
    Ok(user)
}
