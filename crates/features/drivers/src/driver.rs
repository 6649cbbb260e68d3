use crate::error::DriverError;
use crate::ssh::SftpHandle;
use async_trait::async_trait;
use shellcn_domain::driver::{DriverCapabilities, DriverDescriptor, InputTemplate};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Driver-level request to open a transport for one session.
///
/// `settings` come from the connection (already overlaid with template defaults
/// and request-time overrides); `secret` is the decrypted identity payload.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub connection_id: String,
    pub protocol_id: String,
    pub user_id: String,
    pub settings: BTreeMap<String, String>,
    pub secret: serde_json::Value,
    /// Overall deadline for dial + handshake + channel setup.
    pub timeout: Option<Duration>,
}

/// A live transport produced by [`Driver::launch`].
#[async_trait]
pub trait SessionHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Forwards bytes to the remote shell's stdin.
    async fn write_stdin(&self, data: &[u8]) -> Result<(), DriverError>;

    /// Takes the stdout byte pipe. One consumer; `None` after it was taken.
    fn take_stdout(&self) -> Option<mpsc::Receiver<Vec<u8>>>;

    /// Takes the stderr byte pipe. One consumer; `None` after it was taken.
    fn take_stderr(&self) -> Option<mpsc::Receiver<Vec<u8>>>;

    /// Propagates a window-change to the remote PTY.
    async fn resize(&self, cols: u32, rows: u32) -> Result<(), DriverError>;

    /// Lazily opens (or references) the SFTP sub-client on this transport.
    async fn acquire_sftp(&self) -> Result<SftpHandle, DriverError>;

    /// Closes the transport. Idempotent: every call observes the first outcome.
    async fn close(&self) -> Result<(), DriverError>;
}

/// A pluggable protocol driver.
#[async_trait]
pub trait Driver: Send + Sync {
    fn descriptor(&self) -> DriverDescriptor;

    fn capabilities(&self) -> DriverCapabilities;

    /// Input schema for identities usable with this driver.
    fn credential_template(&self) -> InputTemplate;

    /// Input schema for connection settings, when the driver has one.
    fn connection_template(&self) -> Option<InputTemplate>;

    /// Driver-recommended cap on concurrent sessions per connection, consulted
    /// when the connection itself declares none.
    fn default_concurrent_limit(&self) -> Option<u32> {
        None
    }

    /// Cheap self-check for admin diagnostics.
    async fn health_check(&self) -> Result<(), DriverError>;

    async fn launch(&self, request: SessionRequest) -> Result<Arc<dyn SessionHandle>, DriverError>;
}
