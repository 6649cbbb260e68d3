//! Shared test doubles for the sessions suites.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use shellcn_drivers::ssh::SftpHandle;
use shellcn_drivers::{Driver, DriverError, SessionHandle, SessionRequest};
use shellcn_domain::driver::{DriverCapabilities, DriverDescriptor, InputTemplate};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// A transport double: stdin is captured, stdout can be scripted.
pub struct FakeHandle {
    id: String,
    pub written: Mutex<Vec<u8>>,
    stdout_tx: mpsc::Sender<Vec<u8>>,
    stdout_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    stderr_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    closed: AtomicBool,
    pub close_calls: AtomicUsize,
}

impl FakeHandle {
    pub fn new(id: &str) -> Arc<Self> {
        let (stdout_tx, stdout_rx) = mpsc::channel(64);
        let (_stderr_tx, stderr_rx) = mpsc::channel(1);
        Arc::new(Self {
            id: id.to_owned(),
            written: Mutex::new(Vec::new()),
            stdout_tx,
            stdout_rx: Mutex::new(Some(stdout_rx)),
            stderr_rx: Mutex::new(Some(stderr_rx)),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        })
    }

    /// Scripts remote output.
    pub async fn emit_stdout(&self, bytes: &[u8]) {
        let _ = self.stdout_tx.send(bytes.to_vec()).await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SessionHandle for FakeHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_stdin(&self, data: &[u8]) -> Result<(), DriverError> {
        if self.is_closed() {
            return Err(DriverError::Canceled { message: "closed".into(), context: None });
        }
        self.written.lock().extend_from_slice(data);
        Ok(())
    }

    fn take_stdout(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.stdout_rx.lock().take()
    }

    fn take_stderr(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.stderr_rx.lock().take()
    }

    async fn resize(&self, _cols: u32, _rows: u32) -> Result<(), DriverError> {
        Ok(())
    }

    async fn acquire_sftp(&self) -> Result<SftpHandle, DriverError> {
        Err(DriverError::BadRequest {
            message: "Fake transport has no SFTP".into(),
            context: None,
        })
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.close_calls.fetch_add(1, Ordering::AcqRel);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// A driver double that hands out [`FakeHandle`]s and records its launches.
pub struct FakeDriver {
    pub launches: AtomicUsize,
    pub last_secret: Mutex<Option<serde_json::Value>>,
    pub last_handle: Mutex<Option<Arc<FakeHandle>>>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            launches: AtomicUsize::new(0),
            last_secret: Mutex::new(None),
            last_handle: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Driver for FakeDriver {
    fn descriptor(&self) -> DriverDescriptor {
        DriverDescriptor {
            id: "ssh".to_owned(),
            module: "test".to_owned(),
            title: "Fake SSH".to_owned(),
            category: "terminal".to_owned(),
            icon: "terminal".to_owned(),
            default_port: Some(22),
        }
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            terminal: true,
            file_transfer: false,
            session_recording: true,
            reconnect: false,
            extras: Vec::new(),
        }
    }

    fn credential_template(&self) -> InputTemplate {
        InputTemplate::default()
    }

    fn connection_template(&self) -> Option<InputTemplate> {
        None
    }

    async fn health_check(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn launch(
        &self,
        request: SessionRequest,
    ) -> Result<Arc<dyn SessionHandle>, DriverError> {
        self.launches.fetch_add(1, Ordering::AcqRel);
        *self.last_secret.lock() = Some(request.secret.clone());
        let handle = FakeHandle::new(&shellcn_kernel::safe_nanoid!());
        *self.last_handle.lock() = Some(Arc::clone(&handle));
        Ok(handle)
    }
}
