use serde::{Deserialize, Serialize};

/// Static description of a protocol driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverDescriptor {
    pub id: String,
    pub module: String,
    pub title: String,
    pub category: String,
    pub icon: String,
    pub default_port: Option<u16>,
}

/// What a driver can do. Extras beyond the well-known set travel as strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverCapabilities {
    pub terminal: bool,
    pub file_transfer: bool,
    pub session_recording: bool,
    pub reconnect: bool,
    #[serde(default)]
    pub extras: Vec<String>,
}

/// Input-field kinds used by credential and connection templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Password,
    TextArea,
    Number,
    Select { options: Vec<String> },
}

/// One input field of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

/// An input schema for identities or connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputTemplate {
    pub fields: Vec<TemplateField>,
}

impl InputTemplate {
    /// Default values declared by the template, used as the base settings layer.
    #[must_use]
    pub fn defaults(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter_map(|f| f.default.as_ref().map(|d| (f.name.clone(), d.clone())))
            .collect()
    }
}
