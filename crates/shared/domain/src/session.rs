use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a participant's keystrokes reach the remote shell.
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
pub enum AccessMode {
    Read,
    Write,
}

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
pub enum ParticipantRole {
    Owner,
    Viewer,
}

/// Per-user attachment state within a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub role: ParticipantRole,
    pub access_mode: AccessMode,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub consented_to_recording: bool,
}

/// A single live activation of a connection.
///
/// `write_holder` names the at-most-one participant whose input is forwarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: String,
    pub connection_id: String,
    pub protocol_id: String,
    pub owner_id: String,
    pub host: String,
    pub port: u16,
    pub concurrent_limit: u32,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub participants: BTreeMap<String, Participant>,
    pub write_holder: Option<String>,
    pub recording: bool,
}

impl ActiveSession {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// A finalized capture of a recorded session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub session_id: String,
    pub storage_kind: String,
    pub storage_path: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub checksum: String,
    pub retention_until: Option<DateTime<Utc>>,
    pub protected: bool,
    pub created_at: DateTime<Utc>,
}
