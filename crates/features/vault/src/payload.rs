//! Identity payload shapes.
//!
//! The serialized form is part of the on-disk contract: canonical JSON with a
//! fixed field order, readable forever. The AEAD layer binds it to
//! `identity_id:version`, so payload bytes are never interpreted out of place.

use serde::{Deserialize, Serialize};

/// How the driver should authenticate with the stored material.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthMethod {
    Password,
    PrivateKey,
}

/// The SSH identity payload sealed inside the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshIdentityPayload {
    pub username: String,
    pub auth_method: AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_form_is_stable() {
        let payload = SshIdentityPayload {
            username: "tester".to_owned(),
            auth_method: AuthMethod::Password,
            password: Some("secret".to_owned()),
            private_key: None,
            passphrase: None,
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"username":"tester","auth_method":"password","password":"secret"}"#);

        let back: SshIdentityPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }
}
