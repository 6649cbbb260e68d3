//! # Crypto Errors
//!
//! This module defines the [`CryptoError`] enum used throughout the crate for
//! reporting encryption, hashing, and configuration failures. Messages never carry
//! key or plaintext material.

use shellcn_kernel::error::format_context;
use std::borrow::Cow;

/// A specialized error enum for cryptographic failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CryptoError {
    /// Failure during the encryption process.
    #[error("Encryption error{}: {message}", format_context(.context))]
    Encryption { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// AEAD authentication failed on open.
    ///
    /// The key, the associated data, or the stored blob does not match what was
    /// sealed. Deliberately carries no detail about which.
    #[error("Payload failed authentication{}", format_context(.context))]
    Tampered { context: Option<Cow<'static, str>> },

    /// The provided blob is malformed or too short to be a sealed payload.
    #[error("Invalid payload{}: {message}", format_context(.context))]
    InvalidPayload { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Password hashing or verification machinery failed (not a mismatch).
    #[error("Hashing error{}: {message}", format_context(.context))]
    Hashing { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Failure when a key or KDF parameter set is incorrectly configured.
    #[error("Invalid configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal crypto error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

shellcn_kernel::impl_error_context!(CryptoError, CryptoErrorExt {
    Encryption,
    Tampered,
    InvalidPayload,
    Hashing,
    InvalidConfiguration,
    Internal,
});
