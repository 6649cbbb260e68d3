use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a permission applies process-wide or per resource.
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
pub enum PermissionScope {
    Global,
    Resource,
}

/// A declaratively registered permission.
///
/// `depends_on` names prerequisites a role must also hold for this permission to be
/// effective; `implies` names permissions automatically granted when this one is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub module: String,
    pub display_name: String,
    pub scope: PermissionScope,
    pub depends_on: Vec<String>,
    pub implies: Vec<String>,
}

impl Permission {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        module: impl Into<String>,
        display_name: impl Into<String>,
        scope: PermissionScope,
    ) -> Self {
        Self {
            id: id.into(),
            module: module.into(),
            display_name: display_name.into(),
            scope,
            depends_on: Vec::new(),
            implies: Vec::new(),
        }
    }

    #[must_use]
    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn implies(mut self, ids: &[&str]) -> Self {
        self.implies = ids.iter().map(|s| (*s).to_owned()).collect();
        self
    }
}

/// A named set of permissions. System roles are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub is_system: bool,
    pub permissions: Vec<String>,
}

/// A direct per-resource grant augmenting role-based permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePermission {
    pub id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub principal_type: crate::identity::PrincipalType,
    pub principal_id: String,
    pub permission_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
}

impl ResourcePermission {
    /// Non-expired as of `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}
