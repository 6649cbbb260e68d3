//! Shared error-shape helpers.
//!
//! Every crate in the workspace uses the same error idiom: `thiserror` enums whose
//! variants carry a `message: Cow<'static, str>` plus an optional
//! `context: Option<Cow<'static, str>>`, rendered through [`format_context`].
//! [`impl_error_context!`] generates the companion `*Ext` trait so call sites can
//! attach context fluently:
//!
//! ```rust,ignore
//! repo.find_user(id).await.context("Resolving launch actor")?;
//! ```

use std::borrow::Cow;

/// Renders the optional context suffix used by every error display impl.
#[must_use]
pub fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}

/// Generates the `*Ext` context trait for an error enum plus the `Internal`
/// conversions from plain strings.
///
/// List every variant that carries a `context` field; variants not listed keep
/// their context untouched when `.context(..)` is called on a `Result`.
#[macro_export]
macro_rules! impl_error_context {
    ($error:ident, $ext:ident { $($variant:ident),+ $(,)? }) => {
        pub trait $ext<T> {
            fn context(
                self,
                context: impl Into<std::borrow::Cow<'static, str>>,
            ) -> Result<T, $error>;
        }

        impl<T> $ext<T> for Result<T, $error> {
            #[inline]
            fn context(
                self,
                context: impl Into<std::borrow::Cow<'static, str>>,
            ) -> Self {
                self.map_err(|mut e| {
                    match &mut e {
                        $( $error::$variant { context: c, .. } => *c = Some(context.into()), )+
                        #[allow(unreachable_patterns)]
                        _ => {},
                    }
                    e
                })
            }
        }

        impl From<&'static str> for $error {
            #[inline]
            fn from(s: &'static str) -> Self {
                Self::Internal { message: std::borrow::Cow::Borrowed(s), context: None }
            }
        }

        impl From<String> for $error {
            #[inline]
            fn from(s: String) -> Self {
                Self::Internal { message: std::borrow::Cow::Owned(s), context: None }
            }
        }
    };
}
