use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named, reusable definition of a remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub protocol_id: String,
    pub owner_id: String,
    pub team_id: Option<String>,
    pub settings: BTreeMap<String, String>,
    pub identity_id: Option<String>,
    /// Per-connection override of the concurrent-session cap.
    pub concurrent_limit: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One host/port a connection may resolve to, ordered by `ordering`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub id: String,
    pub connection_id: String,
    pub host: String,
    pub port: u16,
    pub ordering: u32,
}
