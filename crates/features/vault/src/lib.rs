//! Credential vault feature slice.
//!
//! Mediates all access to encrypted credentials. Payloads are canonical JSON
//! sealed under a cached master key; every secret update appends the previous
//! ciphertext to an immutable history; sharing is principal-scoped and soft-
//! revoked; master-key rotation re-seals every row and survives a crash midway
//! because each row names the key that sealed it.

mod error;
mod payload;
mod service;

pub use error::{VaultError, VaultErrorExt};
pub use payload::{AuthMethod, SshIdentityPayload};
pub use service::{CreateIdentity, CredentialVault, IdentityMetadata};
