//! Identity provider feature slice.
//!
//! Four authenticators normalized into a single [`ExternalIdentity`] record:
//!
//! * **Local**: username/email + password with Argon2id verifiers and a
//!   failed-attempt lockout window.
//! * **OIDC**: authorization-code + PKCE against a discovered issuer, ID tokens
//!   verified with the discovery JWKS.
//! * **SAML 2.0**: SP-initiated HTTP-Redirect with signed AuthnRequests; the ACS
//!   response is parsed and validated by the SAML library, never by hand-rolled
//!   XML-DSig.
//! * **LDAP**: service bind, subtree search with a templated filter, then a
//!   simple bind as the matched DN.
//!
//! Successful external logins are linked to a local user row keyed by
//! `(provider_type, external_subject)`; rebinding a user already linked to a
//! different provider is refused.

mod error;
mod identity;
mod ldap;
mod local;
mod oidc;
mod registry;
mod retry;
mod saml;

pub use error::{AuthError, AuthErrorExt};
pub use identity::{
    BeginRequest, BeginResponse, CallbackRequest, ExternalIdentity, Provider, ProviderMetadata,
    link_external_identity,
};
pub use ldap::{LdapAuthenticator, build_filter};
pub use local::LocalAuthenticator;
pub use oidc::OidcProvider;
pub use registry::ProviderRegistry;
pub use saml::SamlProvider;
