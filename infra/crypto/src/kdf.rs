//! Master-key derivation.
//!
//! The vault master key is derived from an operator-supplied secret with Argon2id
//! (memory-hard, parameters recorded with the key metadata), then expanded through
//! HKDF-SHA256 into the 256-bit AEAD key. Recording the KDF parameters next to the
//! salt keeps every historical key re-derivable after a parameter upgrade.

use crate::error::CryptoError;
use argon2::{Algorithm, Argon2, Params, Version};
use getrandom::fill;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Minimum salt length accepted for key derivation.
pub const MIN_SALT_LEN: usize = 16;

/// Length of generated salts.
pub const SALT_LEN: usize = 32;

const KEY_LEN: usize = 32;
const HKDF_INFO: &[u8] = b"shellcn.vault.v1:";

/// Argon2id cost parameters, persisted with the derived key's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { memory_kib: 19_456, iterations: 2, parallelism: 1 }
    }
}

/// A derived 256-bit master key, zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Generates a fresh random salt for a new master key.
///
/// # Errors
/// Returns [`CryptoError::Internal`] if the system RNG is unavailable.
pub fn make_salt() -> Result<Vec<u8>, CryptoError> {
    let mut salt = vec![0u8; SALT_LEN];
    fill(&mut salt).map_err(|e| CryptoError::Internal {
        message: e.to_string().into(),
        context: Some("Failed to generate salt".into()),
    })?;
    Ok(salt)
}

/// Derives the vault master key from an operator passphrase.
///
/// # Errors
/// * [`CryptoError::InvalidConfiguration`] if the salt is too short or the Argon2
///   parameters are rejected.
/// * [`CryptoError::Hashing`] if the derivation itself fails.
pub fn derive_master_key(
    passphrase: impl AsRef<[u8]>,
    salt: &[u8],
    params: &KdfParams,
) -> Result<MasterKey, CryptoError> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::InvalidConfiguration {
            message: format!("Salt must be at least {MIN_SALT_LEN} bytes").into(),
            context: None,
        });
    }

    let argon_params = Params::new(params.memory_kib, params.iterations, params.parallelism, None)
        .map_err(|e| CryptoError::InvalidConfiguration {
            message: e.to_string().into(),
            context: Some("Argon2 parameters rejected".into()),
        })?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut ikm = [0u8; KEY_LEN];
    argon.hash_password_into(passphrase.as_ref(), salt, &mut ikm).map_err(|_| {
        CryptoError::Hashing { message: "Master key derivation failed".into(), context: None }
    })?;

    let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut key = [0u8; KEY_LEN];
    hk.expand(HKDF_INFO, &mut key).map_err(|_| CryptoError::Hashing {
        message: "HKDF expansion failed for master key".into(),
        context: None,
    })?;

    ikm.zeroize();

    Ok(MasterKey(key))
}

/// A hex SHA-256 digest of the derived key material.
///
/// Stored with the key metadata so an operator-supplied secret can be verified
/// before use; the digest cannot be reversed into the key.
#[must_use]
pub fn key_verifier(key: &MasterKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
