use crate::identity::KdfSettings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;

/// Top-level core configuration shared across services.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfigInner {
    pub vault: VaultConfig,
    pub sessions: SessionsConfig,
    pub recording: RecordingConfig,
    pub auth: AuthConfig,
    pub providers: Vec<ProviderSettings>,
}

/// Thin Arc-wrapped config for inexpensive cloning into subsystems.
#[derive(Default, Debug, Clone, Deserialize)]
pub struct CoreConfig {
    #[serde(flatten, default)]
    inner: Arc<CoreConfigInner>,
}

impl Deref for CoreConfig {
    type Target = CoreConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for CoreConfig {
    fn deref_mut(&mut self) -> &mut CoreConfigInner {
        Arc::make_mut(&mut self.inner)
    }
}

/// Vault master-key configuration. The secret is operator-supplied and sensitive;
/// it must never be logged or echoed into error messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub master_secret: String,
    pub kdf: KdfSettings,
}

/// Session coordinator knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub default_concurrent_limit: u32,
    pub shutdown_grace_secs: u64,
    /// Sessions with no heartbeat for this long are swept closed. `None` disables the sweep.
    pub stale_after_secs: Option<u64>,
}

/// Deployment-wide recording policy.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Deserialize,
    serde::Serialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordingMode {
    Disabled,
    Optional,
    Forced,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub mode: RecordingMode,
    pub require_consent: bool,
    pub retention_days: Option<u32>,
    pub dir: PathBuf,
}

/// Local-provider lockout policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub lockout_threshold: u32,
    pub lockout_duration_secs: u64,
}

/// Tagged provider configuration, one entry per configured external provider.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderSettings {
    Local(LocalSettings),
    Oidc(OidcSettings),
    Saml(SamlSettings),
    Ldap(LdapSettings),
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
#[serde(default)]
pub struct LocalSettings {
    pub registration_enabled: bool,
    pub require_email_verification: bool,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
#[serde(default)]
pub struct OidcSettings {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
    pub prompt: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
#[serde(default)]
pub struct SamlSettings {
    pub entity_id: String,
    pub acs_url: String,
    /// PEM-encoded SP signing certificate chain.
    pub certificate_pem: String,
    /// PEM-encoded RSA private key for request signing.
    pub private_key_pem: String,
    pub idp_metadata_url: Option<String>,
    pub idp_metadata_xml: Option<String>,
    pub idp_sso_url: Option<String>,
    pub idp_certificate_pem: Option<String>,
    pub attribute_mapping: AttributeMapping,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
#[serde(default)]
pub struct LdapSettings {
    pub host: String,
    pub port: u16,
    pub base_dn: String,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    pub user_filter: Option<String>,
    pub group_filter: Option<String>,
    pub group_base_dn: Option<String>,
    pub attribute_mapping: AttributeMapping,
    pub tls: bool,
    pub no_tls_verify: bool,
    pub timeout_secs: Option<u64>,
}

/// Maps normalized identity fields to provider attribute names.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(default)]
pub struct AttributeMapping {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub avatar: String,
    pub groups: String,
    /// Additional attributes to request verbatim.
    pub extra: BTreeMap<String, String>,
}

// --- Default ---

impl Default for VaultConfig {
    fn default() -> Self {
        Self { master_secret: String::new(), kdf: KdfSettings::default() }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self { default_concurrent_limit: 10, shutdown_grace_secs: 30, stale_after_secs: None }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            mode: RecordingMode::Disabled,
            require_consent: false,
            retention_days: None,
            dir: PathBuf::from("recordings"),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { lockout_threshold: 5, lockout_duration_secs: 15 * 60 }
    }
}

impl Default for AttributeMapping {
    fn default() -> Self {
        Self {
            email: "email".to_owned(),
            first_name: "given_name".to_owned(),
            last_name: "family_name".to_owned(),
            display_name: "name".to_owned(),
            avatar: "picture".to_owned(),
            groups: "groups".to_owned(),
            extra: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.auth.lockout_threshold, 5);
        assert_eq!(cfg.auth.lockout_duration_secs, 15 * 60);
        assert_eq!(cfg.sessions.default_concurrent_limit, 10);
        assert_eq!(cfg.recording.mode, RecordingMode::Disabled);
    }

    #[test]
    fn providers_deserialize_from_tagged_entries() {
        let json = r#"{
            "providers": [
                {"type": "local", "registration_enabled": true},
                {"type": "oidc", "issuer": "https://idp.example.com", "client_id": "shellcn"},
                {"type": "ldap", "host": "ldap.example.com", "port": 636, "base_dn": "dc=example,dc=com", "tls": true}
            ]
        }"#;

        let cfg: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.providers.len(), 3);
        assert!(matches!(cfg.providers[0], ProviderSettings::Local(_)));
        match &cfg.providers[1] {
            ProviderSettings::Oidc(oidc) => assert_eq!(oidc.issuer, "https://idp.example.com"),
            other => panic!("expected oidc, got {other:?}"),
        }
        match &cfg.providers[2] {
            ProviderSettings::Ldap(ldap) => {
                assert_eq!(ldap.port, 636);
                assert!(ldap.tls);
            },
            other => panic!("expected ldap, got {other:?}"),
        }
    }
}
