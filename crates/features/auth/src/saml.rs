use crate::error::AuthError;
use crate::identity::{
    BeginRequest, BeginResponse, CallbackRequest, ExternalIdentity, Provider, ProviderMetadata,
};
use async_trait::async_trait;
use samael::metadata::EntityDescriptor;
use samael::schema::Assertion;
use samael::service_provider::{ServiceProvider, ServiceProviderBuilder};
use shellcn_domain::config::{AttributeMapping, SamlSettings};
use shellcn_domain::user::ProviderType;
use std::collections::HashMap;
use tracing::{debug, info};

/// SP-initiated SAML 2.0 provider.
///
/// AuthnRequests go out signed over the HTTP-Redirect binding with the caller's
/// state as RelayState; the ACS accepts HTTP-POST responses which the SAML
/// library parses and validates against the IdP metadata. XML signature handling
/// stays inside the library.
pub struct SamlProvider {
    settings: SamlSettings,
    sp: ServiceProvider,
    private_key_der: Vec<u8>,
}

impl std::fmt::Debug for SamlProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamlProvider")
            .field("entity_id", &self.settings.entity_id)
            .finish_non_exhaustive()
    }
}

fn invalid(message: impl Into<std::borrow::Cow<'static, str>>) -> AuthError {
    AuthError::InvalidConfiguration { message: message.into(), context: None }
}

fn upstream(err: impl std::fmt::Display) -> AuthError {
    AuthError::Upstream { message: err.to_string().into(), context: None }
}

/// Strips PEM armor down to the base64 body, for embedding in metadata XML.
fn pem_body(pem: &str) -> String {
    pem.lines().filter(|line| !line.starts_with("-----")).collect::<Vec<_>>().join("")
}

/// Builds IdP metadata from an SSO URL plus certificate when no metadata document
/// is available.
fn synthesize_idp_metadata(sso_url: &str, certificate_pem: &str) -> Result<String, AuthError> {
    if sso_url.trim().is_empty() {
        return Err(invalid("idp sso url is required when no metadata is provided"));
    }
    let cert = pem_body(certificate_pem);
    if cert.is_empty() {
        return Err(invalid("idp certificate is required when no metadata is provided"));
    }

    Ok(format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{sso_url}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{sso_url}"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#
    ))
}

impl SamlProvider {
    /// Validates the settings, loads key material, and resolves IdP metadata
    /// (document URL, inline XML, or synthesized from SSO URL + certificate).
    ///
    /// # Errors
    /// * [`AuthError::InvalidConfiguration`] for missing or unparseable material.
    /// * [`AuthError::Upstream`] when a metadata URL cannot be fetched.
    pub async fn new(settings: SamlSettings) -> Result<Self, AuthError> {
        if settings.entity_id.trim().is_empty() {
            return Err(invalid("entity id is required"));
        }
        if settings.acs_url.trim().is_empty() {
            return Err(invalid("acs url is required"));
        }
        if settings.certificate_pem.trim().is_empty() {
            return Err(invalid("signing certificate is required"));
        }
        if settings.private_key_pem.trim().is_empty() {
            return Err(invalid("signing private key is required"));
        }

        let certificate = openssl::x509::X509::from_pem(settings.certificate_pem.as_bytes())
            .map_err(|_| invalid("signing certificate is not valid PEM"))?;
        let rsa = openssl::rsa::Rsa::private_key_from_pem(settings.private_key_pem.as_bytes())
            .map_err(|_| invalid("signing private key is not a valid RSA PEM"))?;
        let private_key_der =
            rsa.private_key_to_der().map_err(|_| invalid("signing private key is unusable"))?;

        let metadata_xml = if let Some(xml) = &settings.idp_metadata_xml {
            xml.clone()
        } else if let Some(url) = &settings.idp_metadata_url {
            reqwest::get(url).await?.error_for_status()?.text().await.map_err(|_| {
                AuthError::Upstream {
                    message: "IdP metadata document is unreadable".into(),
                    context: None,
                }
            })?
        } else {
            synthesize_idp_metadata(
                settings.idp_sso_url.as_deref().unwrap_or_default(),
                settings.idp_certificate_pem.as_deref().unwrap_or_default(),
            )?
        };

        let idp_metadata: EntityDescriptor = samael::metadata::de::from_str(&metadata_xml)
            .map_err(|_| invalid("IdP metadata XML is malformed"))?;

        let sp = ServiceProviderBuilder::default()
            .entity_id(settings.entity_id.clone())
            .certificate(certificate)
            .key(rsa)
            .allow_idp_initiated(false)
            .idp_metadata(idp_metadata)
            .acs_url(settings.acs_url.clone())
            .slo_url(settings.acs_url.clone())
            .build()
            .map_err(|e| invalid(format!("Service provider construction failed: {e}")))?;

        info!(entity_id = %settings.entity_id, "SAML service provider configured");
        Ok(Self { settings, sp, private_key_der })
    }

    /// Serializes the SP metadata document for IdP-side registration.
    ///
    /// # Errors
    /// [`AuthError::Internal`] if the document cannot be produced.
    pub fn sp_metadata_xml(&self) -> Result<String, AuthError> {
        self.sp
            .metadata()
            .map_err(|e| AuthError::Internal {
                message: format!("SP metadata generation failed: {e}").into(),
                context: None,
            })?
            .to_xml()
            .map_err(|e| AuthError::Internal {
                message: format!("SP metadata serialization failed: {e}").into(),
                context: None,
            })
    }

    fn attribute_values(assertion: &Assertion) -> HashMap<String, Vec<String>> {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();

        for statement in assertion.attribute_statements.iter().flatten() {
            for attribute in &statement.attributes {
                let attribute_values: Vec<String> = attribute
                    .values
                    .iter()
                    .filter_map(|v| v.value.clone())
                    .collect();
                if attribute_values.is_empty() {
                    continue;
                }
                if let Some(name) = &attribute.name {
                    values.entry(name.clone()).or_default().extend(attribute_values.clone());
                }
                if let Some(friendly) = &attribute.friendly_name {
                    values.entry(friendly.clone()).or_default().extend(attribute_values);
                }
            }
        }

        values
    }

    fn mapped<'a>(
        values: &'a HashMap<String, Vec<String>>,
        mapping_key: &str,
        fallbacks: &[&str],
    ) -> Option<&'a String> {
        values
            .get(mapping_key)
            .or_else(|| fallbacks.iter().find_map(|key| values.get(*key)))
            .and_then(|v| v.first())
    }
}

#[async_trait]
impl Provider for SamlProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata { provider_type: ProviderType::Saml, display_name: "SAML 2.0".to_owned() }
    }

    async fn begin(&self, req: BeginRequest) -> Result<BeginResponse, AuthError> {
        if req.state.is_empty() {
            return Err(invalid("state is required"));
        }

        let sso_url = self
            .sp
            .sso_binding_location("urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect")
            .ok_or_else(|| invalid("IdP metadata declares no HTTP-Redirect SSO endpoint"))?;

        let authn_request =
            self.sp.make_authentication_request(&sso_url).map_err(upstream)?;
        let request_id = authn_request.id.clone();

        let redirect = authn_request
            .signed_redirect(&req.state, &self.private_key_der)
            .map_err(upstream)?
            .ok_or_else(|| AuthError::Internal {
                message: "Redirect URL construction yielded nothing".into(),
                context: None,
            })?;

        debug!(request_id = %request_id, "SAML AuthnRequest issued");
        Ok(BeginResponse { redirect_url: redirect.to_string(), request_id: Some(request_id) })
    }

    async fn callback(&self, req: CallbackRequest) -> Result<ExternalIdentity, AuthError> {
        let response = req.form.get("SAMLResponse").ok_or_else(|| AuthError::Upstream {
            message: "Callback is missing SAMLResponse".into(),
            context: None,
        })?;

        let request_ids: Vec<&str> = req.request_id.as_deref().into_iter().collect();
        let possible_ids = if request_ids.is_empty() { None } else { Some(request_ids.as_slice()) };

        let assertion =
            self.sp.parse_base64_response(response, possible_ids).map_err(upstream)?;

        let subject = assertion
            .subject
            .as_ref()
            .and_then(|s| s.name_id.as_ref())
            .map(|n| n.value.clone())
            .ok_or_else(|| AuthError::Upstream {
                message: "Assertion carries no subject NameID".into(),
                context: None,
            })?;

        let values = Self::attribute_values(&assertion);
        let mapping: &AttributeMapping = &self.settings.attribute_mapping;

        let email = Self::mapped(&values, &mapping.email, &["mail", "email", "emailAddress"]);
        let given_name = Self::mapped(&values, &mapping.first_name, &["givenName", "firstName"]);
        let family_name = Self::mapped(&values, &mapping.last_name, &["sn", "surname", "lastName"]);
        let display_name = Self::mapped(&values, &mapping.display_name, &["displayName", "cn"]);
        let avatar_url = Self::mapped(&values, &mapping.avatar, &["avatar"]);
        let groups = values
            .get(&mapping.groups)
            .or_else(|| values.get("memberOf"))
            .cloned()
            .unwrap_or_default();

        let raw_claims = serde_json::to_value(&values).map_err(|_| AuthError::Internal {
            message: "Attribute serialization failed".into(),
            context: None,
        })?;

        Ok(ExternalIdentity {
            provider: ProviderType::Saml,
            subject,
            email: email.cloned(),
            email_verified: email.is_some(),
            given_name: given_name.cloned(),
            family_name: family_name.cloned(),
            display_name: display_name.cloned(),
            avatar_url: avatar_url.cloned(),
            groups,
            raw_claims,
        })
    }

    async fn test(&self) -> Result<(), AuthError> {
        self.sp
            .sso_binding_location("urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect")
            .map(|_| ())
            .ok_or_else(|| invalid("IdP metadata declares no HTTP-Redirect SSO endpoint"))
    }
}
