use shellcn_kernel::error::format_context;
use std::borrow::Cow;

/// A specialized error enum for driver failures.
///
/// Clonable so an idempotent close can replay its first outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    /// Settings or secret payloads failed validation.
    #[error("Bad request{}: {message}", format_context(.context))]
    BadRequest { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A driver id was registered twice.
    #[error("Driver already registered{}: {message}", format_context(.context))]
    AlreadyExists { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Dial, handshake, authentication, or channel failures against the target.
    #[error("Upstream unavailable{}: {message}", format_context(.context))]
    Upstream { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The connection deadline elapsed.
    #[error("Timeout{}: {message}", format_context(.context))]
    Timeout { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The operation raced session teardown.
    #[error("Canceled{}: {message}", format_context(.context))]
    Canceled { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal driver error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

shellcn_kernel::impl_error_context!(DriverError, DriverErrorExt {
    BadRequest,
    AlreadyExists,
    Upstream,
    Timeout,
    Canceled,
    Internal,
});

impl From<russh::Error> for DriverError {
    fn from(source: russh::Error) -> Self {
        Self::Upstream { message: source.to_string().into(), context: None }
    }
}

impl From<russh_sftp::client::error::Error> for DriverError {
    fn from(source: russh_sftp::client::error::Error) -> Self {
        Self::Upstream { message: source.to_string().into(), context: Some("SFTP".into()) }
    }
}
