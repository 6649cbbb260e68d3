use shellcn_kernel::error::format_context;
use std::borrow::Cow;

/// A specialized error enum for event-bus failures.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// A channel of a different kind was already registered for this event type.
    #[error("Channel kind mismatch{}: {message}", format_context(.context))]
    ChannelKindMismatch { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The registered sender does not match the requested event type.
    #[error("Channel type mismatch{}: {message}", format_context(.context))]
    TypeMismatch { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A bounded queue refused the event.
    #[error("Channel full{}: {message}", format_context(.context))]
    ChannelFull { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Requested capacity is out of range.
    #[error("Invalid capacity{}: {message}", format_context(.context))]
    InvalidCapacity { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal event bus error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

shellcn_kernel::impl_error_context!(EventBusError, EventBusErrorExt {
    ChannelKindMismatch,
    TypeMismatch,
    ChannelFull,
    InvalidCapacity,
    Internal,
});
