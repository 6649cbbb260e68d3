//! Password hashing for local accounts.
//!
//! Argon2id via the `argon2` crate's PHC-string API. Verification is constant-time
//! inside the library; a mismatch is reported as `Ok(false)` so callers can apply
//! their own lockout accounting without parsing errors.

use crate::error::CryptoError;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};

/// Hashes a plaintext password into an opaque PHC-format verifier.
///
/// # Errors
/// Returns [`CryptoError::Hashing`] if the hashing machinery fails; the message
/// never includes the password.
pub fn hash_password(plain: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(plain.as_bytes(), &salt).map_err(|_| {
        CryptoError::Hashing { message: "Password hashing failed".into(), context: None }
    })?;
    Ok(hash.to_string())
}

/// Verifies a plaintext password against a stored verifier.
///
/// Returns `Ok(false)` on mismatch; errors are reserved for malformed verifiers.
///
/// # Errors
/// Returns [`CryptoError::Hashing`] if the stored verifier cannot be parsed.
pub fn verify_password(verifier: &str, plain: &str) -> Result<bool, CryptoError> {
    let parsed = PasswordHash::new(verifier).map_err(|_| CryptoError::Hashing {
        message: "Stored password verifier is malformed".into(),
        context: None,
    })?;

    Ok(Argon2::default().verify_password(plain.as_bytes(), &parsed).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let verifier = hash_password("password123").unwrap();
        assert!(verifier.starts_with("$argon2id$"));

        assert!(verify_password(&verifier, "password123").unwrap());
        assert!(!verify_password(&verifier, "password124").unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_verifier_errors() {
        let result = verify_password("not-a-phc-string", "whatever");
        assert!(matches!(result, Err(CryptoError::Hashing { .. })));
    }
}
