use crate::driver::SessionHandle;
use crate::error::DriverError;
use crate::ssh::sftp::{SftpHandle, SftpState};
use crate::ssh::verify::HostKeyVerifier;
use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

const STREAM_CAPACITY: usize = 256;

pub(crate) struct ClientHandler {
    pub verifier: Arc<dyn HostKeyVerifier>,
}

#[async_trait]
impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.verifier.verify(server_public_key))
    }
}

/// Commands serialized through the channel pump task.
enum ChannelCommand {
    Data(Vec<u8>),
    Resize { cols: u32, rows: u32 },
    Shutdown,
}

enum CloseState {
    Open,
    Closed(Option<DriverError>),
}

/// A live SSH session: shell channel pump, stdin/stdout/stderr pipes, and an
/// on-demand SFTP sub-client over the same transport.
pub struct SshSessionHandle {
    id: String,
    ssh: Arc<Handle<ClientHandler>>,
    commands: Option<mpsc::Sender<ChannelCommand>>,
    stdout: parking_lot::Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    stderr: parking_lot::Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    sftp: Arc<SftpState>,
    close_state: Mutex<CloseState>,
}

impl std::fmt::Debug for SshSessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSessionHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

impl SshSessionHandle {
    /// Wires the shell channel into a pump task and returns the handle.
    ///
    /// With `channel = None` (pure SFTP sessions) no pump is started and the
    /// stdin/stdout pipes are inert.
    pub(crate) fn new(
        id: String,
        ssh: Handle<ClientHandler>,
        channel: Option<Channel<Msg>>,
    ) -> Self {
        let ssh = Arc::new(ssh);
        let sftp = Arc::new(SftpState::new(Arc::clone(&ssh)));

        let (stdout_tx, stdout_rx) = mpsc::channel(STREAM_CAPACITY);
        let (stderr_tx, stderr_rx) = mpsc::channel(STREAM_CAPACITY);

        let commands = channel.map(|channel| {
            let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
            tokio::spawn(pump(id.clone(), channel, rx, stdout_tx, stderr_tx));
            tx
        });

        Self {
            id,
            ssh,
            commands,
            stdout: parking_lot::Mutex::new(Some(stdout_rx)),
            stderr: parking_lot::Mutex::new(Some(stderr_rx)),
            sftp,
            close_state: Mutex::new(CloseState::Open),
        }
    }

    fn commands(&self) -> Result<&mpsc::Sender<ChannelCommand>, DriverError> {
        self.commands.as_ref().ok_or_else(|| DriverError::BadRequest {
            message: "Session has no interactive shell".into(),
            context: None,
        })
    }

    async fn send_command(&self, command: ChannelCommand) -> Result<(), DriverError> {
        self.commands()?.send(command).await.map_err(|_| DriverError::Canceled {
            message: "Session channel is gone".into(),
            context: None,
        })
    }
}

#[async_trait]
impl SessionHandle for SshSessionHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_stdin(&self, data: &[u8]) -> Result<(), DriverError> {
        self.send_command(ChannelCommand::Data(data.to_vec())).await
    }

    fn take_stdout(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.stdout.lock().take()
    }

    fn take_stderr(&self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.stderr.lock().take()
    }

    async fn resize(&self, cols: u32, rows: u32) -> Result<(), DriverError> {
        self.send_command(ChannelCommand::Resize { cols, rows }).await
    }

    async fn acquire_sftp(&self) -> Result<SftpHandle, DriverError> {
        if matches!(*self.close_state.lock().await, CloseState::Closed(_)) {
            return Err(DriverError::Canceled {
                message: "Session is closed".into(),
                context: None,
            });
        }
        self.sftp.acquire().await
    }

    async fn close(&self) -> Result<(), DriverError> {
        let mut state = self.close_state.lock().await;
        if let CloseState::Closed(result) = &*state {
            return result.clone().map_or(Ok(()), Err);
        }

        let mut first_error: Option<DriverError> = None;

        // Tear the SFTP client down first so its channel closes cleanly.
        self.sftp.mark_closed().await;

        // Stop the shell pump without blocking on a congested command queue; the
        // disconnect below ends the pump either way.
        if let Some(commands) = &self.commands {
            let _ = commands.try_send(ChannelCommand::Shutdown);
        }

        if let Err(err) = self
            .ssh
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
        {
            warn!(session = %self.id, error = %err, "SSH disconnect failed");
            first_error = Some(err.into());
        }

        debug!(session = %self.id, "Session handle closed");
        let outcome = first_error.clone();
        *state = CloseState::Closed(first_error);
        outcome.map_or(Ok(()), Err)
    }
}

/// Owns the shell channel: forwards remote output into the byte pipes and
/// serializes stdin/resize/shutdown commands.
///
/// Stream ordering is inherited from the channel: bytes arrive and are forwarded
/// strictly FIFO per stream.
async fn pump(
    session_id: String,
    mut channel: Channel<Msg>,
    mut commands: mpsc::Receiver<ChannelCommand>,
    stdout: mpsc::Sender<Vec<u8>>,
    stderr: mpsc::Sender<Vec<u8>>,
) {
    loop {
        tokio::select! {
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        if stdout.send(data.to_vec()).await.is_err() {
                            trace!(session = %session_id, "stdout consumer gone, discarding");
                        }
                    },
                    Some(ChannelMsg::ExtendedData { ref data, ext: 1 }) => {
                        if stderr.send(data.to_vec()).await.is_err() {
                            trace!(session = %session_id, "stderr consumer gone, discarding");
                        }
                    },
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!(session = %session_id, exit_status, "Remote shell exited");
                    },
                    Some(ChannelMsg::Eof | ChannelMsg::Close) | None => {
                        debug!(session = %session_id, "Shell channel closed by remote");
                        break;
                    },
                    Some(_) => {},
                }
            },
            cmd = commands.recv() => {
                match cmd {
                    Some(ChannelCommand::Data(bytes)) => {
                        if let Err(err) = channel.data(&bytes[..]).await {
                            warn!(session = %session_id, error = %err, "stdin write failed");
                            break;
                        }
                    },
                    Some(ChannelCommand::Resize { cols, rows }) => {
                        if let Err(err) = channel.window_change(cols, rows, 0, 0).await {
                            warn!(session = %session_id, error = %err, "window change failed");
                        }
                    },
                    Some(ChannelCommand::Shutdown) | None => {
                        let _ = channel.eof().await;
                        break;
                    },
                }
            },
        }
    }
    // Dropping the channel releases it on the transport; stdout/stderr senders
    // drop here which surfaces EOF to consumers.
}
