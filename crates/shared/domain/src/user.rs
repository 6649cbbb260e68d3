use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External authentication provider families.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderType {
    Local,
    Oidc,
    Saml,
    Ldap,
}

/// A gateway account.
///
/// `password_hash` is present only for locally authenticated users; externally
/// provisioned users carry the `(provider_type, external_subject)` binding instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub is_root: bool,
    pub is_active: bool,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub mfa_secret: Option<String>,
    pub provider_type: Option<ProviderType>,
    pub external_subject: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// True when a lockout window is still in effect.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}
