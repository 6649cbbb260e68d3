use shellcn_kernel::error::format_context;
use shellcn_repository::RepoError;
use std::borrow::Cow;

/// A specialized error enum for authentication failures.
///
/// External secrets (passwords, client secrets, tokens) never appear in messages.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Wrong identifier or password. Deliberately indistinguishable from an
    /// unknown account.
    #[error("Invalid credentials{}", format_context(.context))]
    InvalidCredentials { context: Option<Cow<'static, str>> },

    /// The lockout window is in effect (or was just triggered).
    #[error("Account locked{}", format_context(.context))]
    AccountLocked { context: Option<Cow<'static, str>> },

    /// The account is soft-disabled; checked before the password ever is.
    #[error("Account disabled{}", format_context(.context))]
    AccountDisabled { context: Option<Cow<'static, str>> },

    /// The account is already linked to a different identity provider.
    #[error("Provider mismatch{}: {message}", format_context(.context))]
    ProviderMismatch { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A provider with this type is already registered.
    #[error("Provider already registered{}: {message}", format_context(.context))]
    ProviderExists { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Provider construction or request validation failed.
    #[error("Invalid provider configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The upstream IdP rejected the request or returned an error response.
    #[error("Upstream provider error{}: {message}", format_context(.context))]
    Upstream { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The upstream IdP did not answer within the configured deadline.
    #[error("Upstream provider timeout{}: {message}", format_context(.context))]
    Timeout { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Repository failure.
    #[error("Repository error{}: {source}", format_context(.context))]
    Repository { source: RepoError, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal auth error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

shellcn_kernel::impl_error_context!(AuthError, AuthErrorExt {
    InvalidCredentials,
    AccountLocked,
    AccountDisabled,
    ProviderMismatch,
    ProviderExists,
    InvalidConfiguration,
    Upstream,
    Timeout,
    Repository,
    Internal,
});

impl From<RepoError> for AuthError {
    fn from(source: RepoError) -> Self {
        Self::Repository { source, context: None }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { message: "HTTP request timed out".into(), context: None }
        } else {
            // reqwest errors may embed URLs but never request bodies.
            Self::Upstream { message: source.without_url().to_string().into(), context: None }
        }
    }
}
