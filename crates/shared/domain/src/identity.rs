use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Visibility scope of a vault identity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IdentityScope {
    Global,
    Team,
    Connection,
}

/// An encrypted credential record.
///
/// The payload is an AEAD blob sealed under the vault master key identified by
/// `key_id`; `version` increases monotonically with every secret update and the
/// previous payload moves to a [`CredentialVersion`] row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub scope: IdentityScope,
    pub owner_id: String,
    pub team_id: Option<String>,
    pub connection_id: Option<String>,
    pub template: Option<String>,
    pub version: u32,
    pub key_id: String,
    pub encrypted_payload: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only history of prior encrypted payloads, keyed by (identity, version).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialVersion {
    pub identity_id: String,
    pub version: u32,
    pub key_id: String,
    pub encrypted_payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// The kind of principal a share or grant targets.
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
pub enum PrincipalType {
    User,
    Team,
}

/// What a share allows the principal to do with the identity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SharePermission {
    ViewMetadata,
    Use,
    Edit,
}

impl SharePermission {
    /// Whether this grant satisfies `required` (stronger grants imply weaker ones).
    #[must_use]
    pub fn allows(self, required: Self) -> bool {
        match required {
            Self::ViewMetadata => true,
            Self::Use => matches!(self, Self::Use | Self::Edit),
            Self::Edit => matches!(self, Self::Edit),
        }
    }
}

/// A principal-scoped grant on a single identity.
///
/// Revocation is a soft-set of `revoked_at`/`revoked_by`; rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityShare {
    pub id: String,
    pub identity_id: String,
    pub principal_type: PrincipalType,
    pub principal_id: String,
    pub permission: SharePermission,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
}

impl IdentityShare {
    /// Non-revoked and non-expired as of `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// Parameters of the memory-hard KDF used to derive a master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfSettings {
    pub algorithm: String,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfSettings {
    fn default() -> Self {
        // Argon2id defaults per the argon2 crate's recommended parameters.
        Self { algorithm: "argon2id".to_owned(), memory_kib: 19_456, iterations: 2, parallelism: 1 }
    }
}

/// Metadata describing a derived vault master key.
///
/// Exactly one row is active at any time. The verifier digest allows checking an
/// operator-supplied secret without being usable for recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultKeyMetadata {
    pub key_id: String,
    pub active: bool,
    pub kdf: KdfSettings,
    pub salt: Vec<u8>,
    pub derived_at: DateTime<Utc>,
    pub verifier_sha256: String,
    pub rotated_at: Option<DateTime<Utc>>,
}
