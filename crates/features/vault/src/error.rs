use shellcn_crypto::CryptoError;
use shellcn_kernel::error::format_context;
use shellcn_repository::RepoError;
use std::borrow::Cow;

/// A specialized error enum for vault failures.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Scope invariants were violated (team/connection id presence).
    #[error("Invalid identity scope{}: {message}", format_context(.context))]
    InvalidScope { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Payload serialization or sealing failed.
    #[error("Encryption failed{}: {message}", format_context(.context))]
    EncryptionFailed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A stored payload failed authentication. Logged as a high-severity audit
    /// event; the plaintext is never returned.
    #[error("Stored payload failed authentication{}", format_context(.context))]
    Tampered { context: Option<Cow<'static, str>> },

    /// The viewer holds no owner right, share, or team grant for the identity.
    #[error("Forbidden{}: {message}", format_context(.context))]
    Forbidden { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The identity, share, or key row does not exist.
    #[error("Not found{}: {message}", format_context(.context))]
    NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Repository failure.
    #[error("Repository error{}: {source}", format_context(.context))]
    Repository { source: RepoError, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal vault error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

shellcn_kernel::impl_error_context!(VaultError, VaultErrorExt {
    InvalidScope,
    EncryptionFailed,
    Tampered,
    Forbidden,
    NotFound,
    Repository,
    Internal,
});

impl From<RepoError> for VaultError {
    fn from(source: RepoError) -> Self {
        match source {
            RepoError::NotFound { message, context } => Self::NotFound { message, context },
            other => Self::Repository { source: other, context: None },
        }
    }
}

impl From<CryptoError> for VaultError {
    fn from(source: CryptoError) -> Self {
        match source {
            CryptoError::Tampered { context } => Self::Tampered { context },
            CryptoError::InvalidPayload { context, .. } => Self::Tampered { context },
            other => Self::EncryptionFailed { message: other.to_string().into(), context: None },
        }
    }
}

impl From<shellcn_iam::IamError> for VaultError {
    fn from(source: shellcn_iam::IamError) -> Self {
        match source {
            shellcn_iam::IamError::Forbidden { message, context } => {
                Self::Forbidden { message, context }
            },
            shellcn_iam::IamError::NotFound { message, context } => {
                Self::NotFound { message, context }
            },
            other => Self::Internal { message: other.to_string().into(), context: None },
        }
    }
}
