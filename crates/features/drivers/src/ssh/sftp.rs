//! The SFTP sub-client.
//!
//! One SFTP subsystem client is opened lazily per SSH transport and shared by
//! reference count. Acquiring on a closed session fails; the client tears down
//! once the count reaches zero *and* the session has been closed.

use crate::error::DriverError;
use crate::ssh::session::ClientHandler;
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Remote file handle; implements tokio's `AsyncRead`/`AsyncWrite`/`AsyncSeek`.
pub use russh_sftp::client::fs::File as SftpFile;
/// Directory entry returned by [`SftpHandle::read_dir`].
pub use russh_sftp::client::fs::DirEntry as SftpDirEntry;

pub(crate) struct SftpState {
    ssh: Arc<Handle<ClientHandler>>,
    client: Mutex<Option<Arc<SftpSession>>>,
    refcount: AtomicUsize,
    closed: AtomicBool,
}

impl SftpState {
    pub(crate) fn new(ssh: Arc<Handle<ClientHandler>>) -> Self {
        Self {
            ssh,
            client: Mutex::new(None),
            refcount: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<SftpHandle, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Canceled {
                message: "Session is closed".into(),
                context: None,
            });
        }

        let mut slot = self.client.lock().await;
        if slot.is_none() {
            let channel = self.ssh.channel_open_session().await?;
            channel.request_subsystem(true, "sftp").await?;
            let client = SftpSession::new(channel.into_stream()).await?;
            debug!("SFTP subsystem client opened");
            *slot = Some(Arc::new(client));
        }

        let client = slot.clone().ok_or_else(|| DriverError::Internal {
            message: "SFTP client slot empty after initialization".into(),
            context: None,
        })?;
        self.refcount.fetch_add(1, Ordering::AcqRel);
        Ok(SftpHandle { client, state: Arc::clone(self) })
    }

    /// Marks the owning session closed and tears the client down if unreferenced.
    pub(crate) async fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        if self.refcount.load(Ordering::Acquire) == 0 {
            self.client.lock().await.take();
        }
    }

    async fn teardown_if_idle(&self) {
        if self.closed.load(Ordering::Acquire) && self.refcount.load(Ordering::Acquire) == 0 {
            if self.client.lock().await.take().is_some() {
                debug!("SFTP subsystem client torn down");
            }
        }
    }
}

/// A counted reference to the session's SFTP client.
///
/// Dropping the handle releases the reference; the underlying client survives
/// until the session closes and the last reference is gone.
pub struct SftpHandle {
    client: Arc<SftpSession>,
    state: Arc<SftpState>,
}

impl std::fmt::Debug for SftpHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpHandle")
            .field("refcount", &self.state.refcount.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for SftpHandle {
    fn drop(&mut self) {
        let remaining = self.state.refcount.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(remaining, "SFTP reference released");
        if remaining == 0 && self.state.closed.load(Ordering::Acquire) {
            let state = Arc::clone(&self.state);
            tokio::spawn(async move { state.teardown_if_idle().await });
        }
    }
}

impl SftpHandle {
    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<SftpDirEntry>, DriverError> {
        Ok(self.client.read_dir(path).await?.collect())
    }

    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn stat(&self, path: &str) -> Result<FileAttributes, DriverError> {
        Ok(self.client.metadata(path).await?)
    }

    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn open(&self, path: &str) -> Result<SftpFile, DriverError> {
        Ok(self.client.open(path).await?)
    }

    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn open_with_flags(
        &self,
        path: &str,
        flags: OpenFlags,
    ) -> Result<SftpFile, DriverError> {
        Ok(self.client.open_with_flags(path, flags).await?)
    }

    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn create(&self, path: &str) -> Result<SftpFile, DriverError> {
        Ok(self.client.create(path).await?)
    }

    /// Creates every missing directory along `path`.
    ///
    /// # Errors
    /// [`DriverError::Upstream`] when a component cannot be created.
    pub async fn mkdir_all(&self, path: &str) -> Result<(), DriverError> {
        let mut prefix = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if prefix.is_empty() && path.starts_with('/') {
                prefix.push('/');
            } else if !prefix.is_empty() && !prefix.ends_with('/') {
                prefix.push('/');
            }
            prefix.push_str(component);

            if self.client.metadata(prefix.as_str()).await.is_err() {
                self.client.create_dir(prefix.as_str()).await?;
            }
        }
        Ok(())
    }

    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn remove(&self, path: &str) -> Result<(), DriverError> {
        Ok(self.client.remove_file(path).await?)
    }

    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn remove_directory(&self, path: &str) -> Result<(), DriverError> {
        Ok(self.client.remove_dir(path).await?)
    }

    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), DriverError> {
        Ok(self.client.rename(old, new).await?)
    }

    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn truncate(&self, path: &str, size: u64) -> Result<(), DriverError> {
        let attrs = FileAttributes { size: Some(size), ..Default::default() };
        Ok(self.client.set_metadata(path, attrs).await?)
    }

    /// # Errors
    /// [`DriverError::Upstream`] on protocol failures.
    pub async fn real_path(&self, path: &str) -> Result<String, DriverError> {
        Ok(self.client.canonicalize(path).await?)
    }
}
