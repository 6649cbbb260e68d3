use shellcn_drivers::DriverError;
use shellcn_kernel::error::format_context;
use shellcn_repository::RepoError;
use shellcn_vault::VaultError;
use std::borrow::Cow;

/// A specialized error enum for session lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The owner already has a live session on this connection.
    #[error("An active session already exists for this connection{}", format_context(.context))]
    ActiveSessionExists { context: Option<Cow<'static, str>> },

    /// The connection reached its concurrent-session cap.
    #[error("Concurrent session limit of {limit} reached{}", format_context(.context))]
    ConcurrentLimitReached { limit: u32, context: Option<Cow<'static, str>> },

    /// The session or connection does not exist (or is hidden from the caller).
    #[error("Not found{}: {message}", format_context(.context))]
    NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The caller lacks a required permission or the write token.
    #[error("Forbidden{}: {message}", format_context(.context))]
    Forbidden { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The request is malformed (protocol mismatch, missing identity or target).
    #[error("Bad request{}: {message}", format_context(.context))]
    BadRequest { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The operation raced cancellation or teardown.
    #[error("Canceled{}: {message}", format_context(.context))]
    Canceled { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Driver failure while opening or driving the transport.
    #[error("Driver error{}: {source}", format_context(.context))]
    Driver { source: DriverError, context: Option<Cow<'static, str>> },

    /// Vault failure while resolving the connection identity.
    #[error("Vault error{}: {source}", format_context(.context))]
    Vault { source: VaultError, context: Option<Cow<'static, str>> },

    /// Repository failure.
    #[error("Repository error{}: {source}", format_context(.context))]
    Repository { source: RepoError, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal session error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

shellcn_kernel::impl_error_context!(SessionError, SessionErrorExt {
    ActiveSessionExists,
    ConcurrentLimitReached,
    NotFound,
    Forbidden,
    BadRequest,
    Canceled,
    Driver,
    Vault,
    Repository,
    Internal,
});

impl From<RepoError> for SessionError {
    fn from(source: RepoError) -> Self {
        match source {
            RepoError::NotFound { message, context } => Self::NotFound { message, context },
            other => Self::Repository { source: other, context: None },
        }
    }
}

impl From<DriverError> for SessionError {
    fn from(source: DriverError) -> Self {
        match source {
            DriverError::BadRequest { message, context } => Self::BadRequest { message, context },
            DriverError::Canceled { message, context } => Self::Canceled { message, context },
            other => Self::Driver { source: other, context: None },
        }
    }
}

impl From<VaultError> for SessionError {
    fn from(source: VaultError) -> Self {
        match source {
            VaultError::Forbidden { message, context } => Self::Forbidden { message, context },
            VaultError::NotFound { message, context } => Self::NotFound { message, context },
            other => Self::Vault { source: other, context: None },
        }
    }
}

impl From<shellcn_iam::IamError> for SessionError {
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
