use shellcn_kernel::error::format_context;
use shellcn_repository::RepoError;
use std::borrow::Cow;

/// A specialized error enum for IAM failures.
#[derive(Debug, thiserror::Error)]
pub enum IamError {
    /// A permission id was registered twice.
    #[error("Permission already registered{}: {message}", format_context(.context))]
    AlreadyExists { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A referenced permission, role, or user does not exist.
    #[error("Not found{}: {message}", format_context(.context))]
    NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The caller lacks the permission this operation enforces.
    #[error("Forbidden{}: {message}", format_context(.context))]
    Forbidden { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Repository failure while resolving roles or grants.
    #[error("Repository error{}: {source}", format_context(.context))]
    Repository { source: RepoError, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal IAM error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

shellcn_kernel::impl_error_context!(IamError, IamErrorExt {
    AlreadyExists,
    NotFound,
    Forbidden,
    Repository,
    Internal,
});

impl From<RepoError> for IamError {
    fn from(source: RepoError) -> Self {
        match source {
            RepoError::NotFound { message, context } => Self::NotFound { message, context },
            other => Self::Repository { source: other, context: None },
        }
    }
}
