use crate::error::AuthError;
use crate::retry::with_one_retry;
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, ldap_escape};
use shellcn_domain::config::LdapSettings;
use shellcn_domain::user::ProviderType;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::identity::{
    BeginRequest, BeginResponse, CallbackRequest, ExternalIdentity, Provider, ProviderMetadata,
};

const DEFAULT_FILTER: &str = "(uid={identifier})";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Renders a search filter template for an identifier.
///
/// `{identifier}` and `{email}` are both substituted with the (LDAP-escaped)
/// identifier; an empty template falls back to `(uid={identifier})`.
#[must_use]
pub fn build_filter(template: &str, identifier: &str) -> String {
    let template = if template.trim().is_empty() { DEFAULT_FILTER } else { template };
    let escaped = ldap_escape(identifier);
    template.replace("{identifier}", &escaped).replace("{email}", &escaped)
}

/// LDAP bind-and-search authentication.
pub struct LdapAuthenticator {
    settings: LdapSettings,
}

impl std::fmt::Debug for LdapAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapAuthenticator")
            .field("host", &self.settings.host)
            .field("base_dn", &self.settings.base_dn)
            .finish_non_exhaustive()
    }
}

impl LdapAuthenticator {
    /// # Errors
    /// [`AuthError::InvalidConfiguration`] when host, port, or base DN are unset.
    pub fn new(settings: LdapSettings) -> Result<Self, AuthError> {
        let invalid = |message: &'static str| AuthError::InvalidConfiguration {
            message: message.into(),
            context: None,
        };
        if settings.host.trim().is_empty() {
            return Err(invalid("host is required"));
        }
        if settings.port == 0 {
            return Err(invalid("port must be at least 1"));
        }
        if settings.base_dn.trim().is_empty() {
            return Err(invalid("base dn is required"));
        }
        Ok(Self { settings })
    }

    fn url(&self) -> String {
        let scheme = if self.settings.tls { "ldaps" } else { "ldap" };
        format!("{scheme}://{}:{}", self.settings.host, self.settings.port)
    }

    fn conn_settings(&self) -> LdapConnSettings {
        LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(
                self.settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .set_no_tls_verify(self.settings.no_tls_verify)
    }

    /// Opens a connection and performs the service bind (anonymous when no bind
    /// DN is configured). The bind path is idempotent and gets one retry.
    async fn service_bind(&self) -> Result<Ldap, AuthError> {
        with_one_retry("ldap_service_bind", || async {
            let (conn, mut ldap) = LdapConnAsync::with_settings(self.conn_settings(), &self.url())
                .await
                .map_err(|e| AuthError::Upstream {
                    message: e.to_string().into(),
                    context: Some("LDAP connect".into()),
                })?;
            ldap3::drive!(conn);

            let bind_dn = self.settings.bind_dn.clone().unwrap_or_default();
            let bind_password = self.settings.bind_password.clone().unwrap_or_default();
            ldap.simple_bind(&bind_dn, &bind_password)
                .await
                .and_then(ldap3::LdapResult::success)
                .map_err(|e| AuthError::Upstream {
                    message: e.to_string().into(),
                    context: Some("LDAP service bind".into()),
                })?;

            Ok::<_, AuthError>(ldap)
        })
        .await
    }

    fn requested_attributes(&self) -> Vec<String> {
        let mapping = &self.settings.attribute_mapping;
        let mut attrs = vec![
            mapping.email.clone(),
            mapping.first_name.clone(),
            mapping.last_name.clone(),
            mapping.display_name.clone(),
            mapping.avatar.clone(),
            mapping.groups.clone(),
            "dn".to_owned(),
        ];
        attrs.extend(mapping.extra.values().cloned());
        attrs
    }

    /// Authenticates `identifier` by searching for its entry and re-binding with
    /// the supplied password.
    ///
    /// # Errors
    /// * [`AuthError::InvalidCredentials`] on zero matches or a failed user bind.
    /// * [`AuthError::Internal`] when the filter matches multiple entries.
    /// * [`AuthError::Upstream`] on connectivity or protocol failures.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<ExternalIdentity, AuthError> {
        if password.is_empty() {
            return Err(AuthError::InvalidCredentials { context: None });
        }

        let mut ldap = self.service_bind().await?;

        let filter = build_filter(
            self.settings.user_filter.as_deref().unwrap_or_default(),
            identifier,
        );
        debug!(filter = %filter, base = %self.settings.base_dn, "LDAP user search");

        let (mut entries, _res) = ldap
            .search(
                &self.settings.base_dn,
                Scope::Subtree,
                &filter,
                self.requested_attributes(),
            )
            .await
            .and_then(ldap3::SearchResult::success)
            .map_err(|e| AuthError::Upstream {
                message: e.to_string().into(),
                context: Some("LDAP user search".into()),
            })?;

        if entries.is_empty() {
            return Err(AuthError::InvalidCredentials { context: None });
        }
        if entries.len() > 1 {
            return Err(AuthError::Internal {
                message: format!("Filter matched {} entries", entries.len()).into(),
                context: None,
            });
        }

        let entry = SearchEntry::construct(entries.remove(0));
        let dn = entry.dn.clone();

        // Re-bind as the found DN; this is the actual credential check.
        ldap.simple_bind(&dn, password)
            .await
            .and_then(ldap3::LdapResult::success)
            .map_err(|_| AuthError::InvalidCredentials { context: None })?;

        let groups = self.search_groups(&mut ldap, &dn, identifier).await?;
        let _ = ldap.unbind().await;

        info!(dn = %dn, "LDAP authentication succeeded");
        Ok(self.normalize(entry, dn, groups))
    }

    /// Optional group enumeration via a separate search.
    async fn search_groups(
        &self,
        ldap: &mut Ldap,
        dn: &str,
        identifier: &str,
    ) -> Result<Vec<String>, AuthError> {
        let Some(template) = &self.settings.group_filter else {
            return Ok(Vec::new());
        };

        let filter =
            template.replace("{dn}", &ldap_escape(dn)).replace("{identifier}", &ldap_escape(identifier));
        let base = self.settings.group_base_dn.as_deref().unwrap_or(&self.settings.base_dn);

        let (entries, _res) = ldap
            .search(base, Scope::Subtree, &filter, vec!["cn"])
            .await
            .and_then(ldap3::SearchResult::success)
            .map_err(|e| AuthError::Upstream {
                message: e.to_string().into(),
                context: Some("LDAP group search".into()),
            })?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .filter_map(|entry| entry.attrs.get("cn").and_then(|v| v.first().cloned()))
            .collect())
    }

    fn normalize(
        &self,
        entry: SearchEntry,
        dn: String,
        searched_groups: Vec<String>,
    ) -> ExternalIdentity {
        let mapping = &self.settings.attribute_mapping;
        let first = |attrs: &HashMap<String, Vec<String>>, key: &str| {
            attrs.get(key).and_then(|v| v.first().cloned())
        };

        let email = first(&entry.attrs, &mapping.email);
        let groups = if searched_groups.is_empty() {
            entry.attrs.get(&mapping.groups).cloned().unwrap_or_default()
        } else {
            searched_groups
        };

        let raw_claims = serde_json::to_value(&entry.attrs).unwrap_or_default();

        ExternalIdentity {
            provider: ProviderType::Ldap,
            subject: dn,
            email_verified: email.is_some(),
            email,
            given_name: first(&entry.attrs, &mapping.first_name),
            family_name: first(&entry.attrs, &mapping.last_name),
            display_name: first(&entry.attrs, &mapping.display_name),
            avatar_url: first(&entry.attrs, &mapping.avatar),
            groups,
            raw_claims,
        }
    }
}

#[async_trait]
impl Provider for LdapAuthenticator {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata { provider_type: ProviderType::Ldap, display_name: "LDAP".to_owned() }
    }

    /// LDAP has no redirect leg; the adapter collects credentials directly.
    async fn begin(&self, _req: BeginRequest) -> Result<BeginResponse, AuthError> {
        Err(AuthError::InvalidConfiguration {
            message: "LDAP does not use a redirect flow".into(),
            context: None,
        })
    }

    async fn callback(&self, req: CallbackRequest) -> Result<ExternalIdentity, AuthError> {
        let identifier = req.form.get("identifier").ok_or_else(|| {
            AuthError::InvalidCredentials { context: Some("identifier missing".into()) }
        })?;
        let password = req.form.get("password").ok_or_else(|| {
            AuthError::InvalidCredentials { context: Some("password missing".into()) }
        })?;
        self.authenticate(identifier, password).await
    }

    async fn test(&self) -> Result<(), AuthError> {
        let mut ldap = self.service_bind().await?;
        let _ = ldap.unbind().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellcn_domain::config::AttributeMapping;

    #[test]
    fn filter_substitutes_both_tokens() {
        let rendered = build_filter(
            "(&(objectClass=person)(|(uid={identifier})(mail={email})))",
            "alice@example.com",
        );
        assert_eq!(
            rendered,
            "(&(objectClass=person)(|(uid=alice@example.com)(mail=alice@example.com)))"
        );
    }

    #[test]
    fn empty_template_uses_default() {
        assert_eq!(build_filter("", "alice@example.com"), "(uid=alice@example.com)");
    }

    #[test]
    fn special_characters_are_escaped() {
        assert_eq!(build_filter("", "a*lice"), "(uid=a\\2alice)");
    }

    #[test]
    fn construction_validates_settings() {
        let err = LdapAuthenticator::new(LdapSettings::default()).unwrap_err();
        assert!(err.to_string().contains("host is required"));

        let settings = LdapSettings {
            host: "ldap.example.com".to_owned(),
            port: 0,
            base_dn: "dc=example,dc=com".to_owned(),
            attribute_mapping: AttributeMapping::default(),
            ..LdapSettings::default()
        };
        let err = LdapAuthenticator::new(settings).unwrap_err();
        assert!(err.to_string().contains("port must be at least 1"));
    }
}
