use crate::error::{AuthError, AuthErrorExt};
use crate::identity::{
    BeginRequest, BeginResponse, CallbackRequest, ExternalIdentity, Provider, ProviderMetadata,
};
use crate::retry::with_one_retry;
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use shellcn_domain::config::OidcSettings;
use shellcn_domain::user::ProviderType;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email"];

/// The subset of the discovery document this provider consumes.
#[derive(Debug, Clone, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
}

/// OIDC authorization-code + PKCE provider.
///
/// Construction performs discovery against the issuer, bounded by the configured
/// timeout; the HTTP client is injectable for tests and proxies.
pub struct OidcProvider {
    settings: OidcSettings,
    http: reqwest::Client,
    discovery: DiscoveryDocument,
    jwks: JwkSet,
}

impl std::fmt::Debug for OidcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcProvider").field("issuer", &self.settings.issuer).finish_non_exhaustive()
    }
}

fn validate(settings: &OidcSettings) -> Result<(), AuthError> {
    let missing = |message: &'static str| AuthError::InvalidConfiguration {
        message: message.into(),
        context: None,
    };
    if settings.issuer.trim().is_empty() {
        return Err(missing("issuer is required"));
    }
    if settings.client_id.trim().is_empty() {
        return Err(missing("client id is required"));
    }
    if settings.client_secret.trim().is_empty() {
        return Err(missing("client secret is required"));
    }
    if settings.redirect_url.trim().is_empty() {
        return Err(missing("redirect url is required"));
    }
    Ok(())
}

impl OidcProvider {
    /// Validates the settings and performs discovery with a default client.
    ///
    /// # Errors
    /// * [`AuthError::InvalidConfiguration`] for missing fields.
    /// * [`AuthError::Upstream`]/[`AuthError::Timeout`] when discovery fails.
    pub async fn discover(settings: OidcSettings) -> Result<Self, AuthError> {
        validate(&settings)?;
        let timeout = Duration::from_secs(settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(|_| {
            AuthError::Internal { message: "HTTP client construction failed".into(), context: None }
        })?;
        Self::discover_with_client(settings, http).await
    }

    /// Discovery with an injected HTTP client.
    ///
    /// # Errors
    /// Same as [`OidcProvider::discover`].
    pub async fn discover_with_client(
        settings: OidcSettings,
        http: reqwest::Client,
    ) -> Result<Self, AuthError> {
        validate(&settings)?;

        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            settings.issuer.trim_end_matches('/')
        );

        // Discovery and the JWKS fetch are idempotent; each gets one retry.
        let discovery: DiscoveryDocument = with_one_retry("oidc_discovery", || async {
            Ok::<_, AuthError>(
                http.get(&discovery_url).send().await?.error_for_status()?.json().await?,
            )
        })
        .await
        .context("OIDC discovery")?;

        if discovery.issuer.trim_end_matches('/') != settings.issuer.trim_end_matches('/') {
            return Err(AuthError::Upstream {
                message: "Discovery document issuer mismatch".into(),
                context: None,
            });
        }

        let jwks: JwkSet = with_one_retry("oidc_jwks", || async {
            Ok::<_, AuthError>(
                http.get(&discovery.jwks_uri).send().await?.error_for_status()?.json().await?,
            )
        })
        .await
        .context("OIDC JWKS fetch")?;

        info!(issuer = %discovery.issuer, "OIDC provider discovered");
        Ok(Self { settings, http, discovery, jwks })
    }

    fn scopes(&self) -> String {
        if self.settings.scopes.is_empty() {
            DEFAULT_SCOPES.join(" ")
        } else {
            self.settings.scopes.join(" ")
        }
    }

    fn verify_id_token(
        &self,
        id_token: &str,
        expected_nonce: Option<&str>,
    ) -> Result<serde_json::Value, AuthError> {
        let header = decode_header(id_token).map_err(|_| AuthError::Upstream {
            message: "ID token header is malformed".into(),
            context: None,
        })?;

        let jwk = header
            .kid
            .as_deref()
            .and_then(|kid| self.jwks.find(kid))
            .or_else(|| self.jwks.keys.first())
            .ok_or_else(|| AuthError::Upstream {
                message: "No JWKS key matches the ID token".into(),
                context: None,
            })?;

        let key = DecodingKey::from_jwk(jwk).map_err(|_| AuthError::Upstream {
            message: "JWKS key is unusable".into(),
            context: None,
        })?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.discovery.issuer.as_str()]);
        validation.set_audience(&[self.settings.client_id.as_str()]);

        let data = decode::<serde_json::Value>(id_token, &key, &validation).map_err(|e| {
            AuthError::Upstream {
                message: format!("ID token verification failed: {e}").into(),
                context: None,
            }
        })?;

        if let Some(expected) = expected_nonce {
            let nonce = data.claims.get("nonce").and_then(serde_json::Value::as_str);
            if nonce != Some(expected) {
                return Err(AuthError::Upstream {
                    message: "ID token nonce mismatch".into(),
                    context: None,
                });
            }
        }

        Ok(data.claims)
    }
}

#[async_trait]
impl Provider for OidcProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider_type: ProviderType::Oidc,
            display_name: "OpenID Connect".to_owned(),
        }
    }

    async fn begin(&self, req: BeginRequest) -> Result<BeginResponse, AuthError> {
        if req.state.is_empty() {
            return Err(AuthError::InvalidConfiguration {
                message: "state is required".into(),
                context: None,
            });
        }
        let nonce = req.nonce.as_deref().ok_or_else(|| AuthError::InvalidConfiguration {
            message: "nonce is required".into(),
            context: None,
        })?;
        let challenge =
            req.code_challenge.as_deref().ok_or_else(|| AuthError::InvalidConfiguration {
                message: "PKCE code challenge is required".into(),
                context: None,
            })?;

        let mut url =
            Url::parse(&self.discovery.authorization_endpoint).map_err(|_| AuthError::Upstream {
                message: "Authorization endpoint is not a valid URL".into(),
                context: None,
            })?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_url)
            .append_pair("scope", &self.scopes())
            .append_pair("state", &req.state)
            .append_pair("nonce", nonce)
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "S256");

        let prompt = req.prompt.as_deref().or(self.settings.prompt.as_deref());
        if let Some(prompt) = prompt {
            url.query_pairs_mut().append_pair("prompt", prompt);
        }

        debug!(issuer = %self.discovery.issuer, "OIDC flow started");
        Ok(BeginResponse { redirect_url: url.into(), request_id: None })
    }

    async fn callback(&self, req: CallbackRequest) -> Result<ExternalIdentity, AuthError> {
        if let Some(error) = req.query.get("error") {
            let description = req.query.get("error_description").cloned().unwrap_or_default();
            return Err(AuthError::Upstream {
                message: format!("{error}: {description}").into(),
                context: Some("Authorization callback".into()),
            });
        }

        let code = req.query.get("code").ok_or_else(|| AuthError::Upstream {
            message: "Callback is missing the authorization code".into(),
            context: None,
        })?;
        let verifier =
            req.code_verifier.as_deref().ok_or_else(|| AuthError::InvalidConfiguration {
                message: "PKCE code verifier is required".into(),
                context: None,
            })?;

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.settings.redirect_url.as_str()),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("code_verifier", verifier),
        ];

        let token: TokenResponse = self
            .http
            .post(&self.discovery.token_endpoint)
            .form(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|_| AuthError::Upstream {
                message: "Token endpoint returned an unreadable response".into(),
                context: None,
            })?;

        let claims = self.verify_id_token(&token.id_token, req.expected_nonce.as_deref())?;

        let get_str =
            |key: &str| claims.get(key).and_then(serde_json::Value::as_str).map(str::to_owned);

        let subject = get_str("sub").ok_or_else(|| AuthError::Upstream {
            message: "ID token has no subject".into(),
            context: None,
        })?;

        let groups = claims
            .get("groups")
            .and_then(serde_json::Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(ExternalIdentity {
            provider: ProviderType::Oidc,
            subject,
            email: get_str("email"),
            email_verified: claims
                .get("email_verified")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            given_name: get_str("given_name"),
            family_name: get_str("family_name"),
            display_name: get_str("name"),
            avatar_url: get_str("picture"),
            groups,
            raw_claims: claims,
        })
    }

    async fn test(&self) -> Result<(), AuthError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            self.settings.issuer.trim_end_matches('/')
        );
        self.http.get(&discovery_url).send().await?.error_for_status()?;
        Ok(())
    }
}
