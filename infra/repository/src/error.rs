use shellcn_kernel::error::format_context;
use std::borrow::Cow;

/// A specialized error enum for repository failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepoError {
    /// The requested row does not exist.
    #[error("Not found{}: {message}", format_context(.context))]
    NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A unique constraint was violated.
    #[error("Already exists{}: {message}", format_context(.context))]
    AlreadyExists { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The operation conflicts with current row state (e.g. mutating a system role).
    #[error("Conflict{}: {message}", format_context(.context))]
    Conflict { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal repository error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

shellcn_kernel::impl_error_context!(RepoError, RepoErrorExt {
    NotFound,
    AlreadyExists,
    Conflict,
    Internal,
});

impl RepoError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound { message: format!("{entity} '{id}'").into(), context: None }
    }

    pub(crate) fn already_exists(entity: &'static str, key: &str) -> Self {
        Self::AlreadyExists { message: format!("{entity} '{key}'").into(), context: None }
    }
}
