use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A participant-visible lifecycle event.
///
/// Events for a given session are published in a total order; consumers must not
/// reorder them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLifecycleEvent {
    pub session_id: String,
    pub at: DateTime<Utc>,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    Started,
    ParticipantJoined { user_id: String },
    ParticipantLeft { user_id: String },
    WriteGranted { user_id: String },
    WriteReleased,
    RecordingStarted,
    RecordingDegraded,
    RecordingStopped { record_id: Option<String> },
    Closed { reason: String },
}

/// Emitted when an AEAD open fails on a stored payload. High severity: this means
/// ciphertext, nonce, or associated data changed underneath us.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TamperingDetected {
    pub identity_id: String,
    pub version: u32,
    pub viewer_id: String,
    pub at: DateTime<Utc>,
}
