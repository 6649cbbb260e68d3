use shellcn_kernel::error::format_context;
use std::borrow::Cow;

/// A specialized error enum for logger initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// A global subscriber has already been installed.
    #[error("Subscriber error{}: {source}", format_context(.context))]
    Subscriber {
        source: tracing_subscriber::util::TryInitError,
        context: Option<Cow<'static, str>>,
    },

    /// The rolling file appender could not be built.
    #[error("File appender error{}: {source}", format_context(.context))]
    Appender {
        source: tracing_appender::rolling::InitError,
        context: Option<Cow<'static, str>>,
    },

    /// Failure when the builder is incorrectly configured.
    #[error("Invalid configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal logger error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

shellcn_kernel::impl_error_context!(LoggerError, LoggerErrorExt {
    Subscriber,
    Appender,
    InvalidConfiguration,
    Internal,
});

impl From<tracing_subscriber::util::TryInitError> for LoggerError {
    fn from(source: tracing_subscriber::util::TryInitError) -> Self {
        Self::Subscriber { source, context: None }
    }
}

impl From<tracing_appender::rolling::InitError> for LoggerError {
    fn from(source: tracing_appender::rolling::InitError) -> Self {
        Self::Appender { source, context: None }
    }
}
