//! The SSH protocol driver.

mod config;
mod session;
mod sftp;
mod verify;

pub use session::SshSessionHandle;
pub use sftp::{SftpDirEntry, SftpFile, SftpHandle};
pub use verify::{AcceptAllVerifier, HostKeyVerifier, PinnedFingerprintVerifier};

use crate::driver::{Driver, SessionHandle, SessionRequest};
use crate::error::DriverError;
use async_trait::async_trait;
use config::{SshAuth, SshSecret, SshSettings};
use russh::client::{self, Handle};
use russh::{Disconnect, Pty};
use session::ClientHandler;
use shellcn_domain::driver::{
    DriverCapabilities, DriverDescriptor, FieldKind, InputTemplate, TemplateField,
};
use shellcn_kernel::safe_nanoid;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The SSH driver (also registered as `sftp` for shell-less file sessions).
pub struct SshDriver {
    protocol_id: &'static str,
    verifier: Arc<dyn HostKeyVerifier>,
}

impl std::fmt::Debug for SshDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshDriver").field("protocol_id", &self.protocol_id).finish_non_exhaustive()
    }
}

impl SshDriver {
    /// Interactive SSH with on-demand SFTP.
    #[must_use]
    pub fn new(verifier: Arc<dyn HostKeyVerifier>) -> Self {
        Self { protocol_id: "ssh", verifier }
    }

    /// The same transport registered under `sftp`: no PTY, subsystem only.
    #[must_use]
    pub fn sftp_only(verifier: Arc<dyn HostKeyVerifier>) -> Self {
        Self { protocol_id: "sftp", verifier }
    }

    async fn connect(
        &self,
        settings: &SshSettings,
        secret: &SshSecret,
    ) -> Result<Handle<ClientHandler>, DriverError> {
        let config = Arc::new(client::Config::default());
        let handler = ClientHandler { verifier: Arc::clone(&self.verifier) };
        let address = (settings.host.as_str(), settings.port);

        let mut session =
            tokio::time::timeout(settings.timeout, client::connect(config, address, handler))
                .await
                .map_err(|_| DriverError::Timeout {
                    message: format!(
                        "Connecting to {}:{} took longer than {:?}",
                        settings.host, settings.port, settings.timeout
                    )
                    .into(),
                    context: None,
                })?
                .map_err(|e| DriverError::Upstream {
                    message: e.to_string().into(),
                    context: Some("SSH dial/handshake".into()),
                })?;

        let authenticated = match &secret.auth {
            SshAuth::PrivateKey { private_key, passphrase, password } => {
                let key_pair =
                    russh_keys::decode_secret_key(private_key, passphrase.as_deref()).map_err(
                        |e| DriverError::BadRequest {
                            message: format!("Unsupported or unreadable private key: {e}").into(),
                            context: None,
                        },
                    )?;

                let mut ok = session
                    .authenticate_publickey(&secret.username, Arc::new(key_pair))
                    .await?;
                if !ok && let Some(password) = password {
                    ok = session.authenticate_password(&secret.username, password).await?;
                }
                ok
            },
            SshAuth::Password { password } => {
                session.authenticate_password(&secret.username, password).await?
            },
        };

        if !authenticated {
            let _ = session.disconnect(Disconnect::ByApplication, "auth failed", "en").await;
            return Err(DriverError::Upstream {
                message: "SSH authentication was rejected".into(),
                context: None,
            });
        }

        Ok(session)
    }
}

#[async_trait]
impl Driver for SshDriver {
    fn descriptor(&self) -> DriverDescriptor {
        DriverDescriptor {
            id: self.protocol_id.to_owned(),
            module: "ssh".to_owned(),
            title: if self.protocol_id == "sftp" { "SFTP" } else { "SSH" }.to_owned(),
            category: "terminal".to_owned(),
            icon: "terminal".to_owned(),
            default_port: Some(config::DEFAULT_PORT),
        }
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            terminal: self.protocol_id == "ssh",
            file_transfer: true,
            session_recording: self.protocol_id == "ssh",
            reconnect: true,
            extras: Vec::new(),
        }
    }

    fn credential_template(&self) -> InputTemplate {
        InputTemplate {
            fields: vec![
                TemplateField {
                    name: "username".to_owned(),
                    label: "Username".to_owned(),
                    kind: FieldKind::Text,
                    required: true,
                    default: None,
                },
                TemplateField {
                    name: "auth_method".to_owned(),
                    label: "Authentication method".to_owned(),
                    kind: FieldKind::Select {
                        options: vec!["password".to_owned(), "private_key".to_owned()],
                    },
                    required: true,
                    default: Some("password".to_owned()),
                },
                TemplateField {
                    name: "password".to_owned(),
                    label: "Password".to_owned(),
                    kind: FieldKind::Password,
                    required: false,
                    default: None,
                },
                TemplateField {
                    name: "private_key".to_owned(),
                    label: "Private key (PEM)".to_owned(),
                    kind: FieldKind::TextArea,
                    required: false,
                    default: None,
                },
                TemplateField {
                    name: "passphrase".to_owned(),
                    label: "Key passphrase".to_owned(),
                    kind: FieldKind::Password,
                    required: false,
                    default: None,
                },
            ],
        }
    }

    fn connection_template(&self) -> Option<InputTemplate> {
        Some(InputTemplate {
            fields: vec![
                TemplateField {
                    name: "host".to_owned(),
                    label: "Host".to_owned(),
                    kind: FieldKind::Text,
                    required: true,
                    default: None,
                },
                TemplateField {
                    name: "port".to_owned(),
                    label: "Port".to_owned(),
                    kind: FieldKind::Number,
                    required: false,
                    default: Some(config::DEFAULT_PORT.to_string()),
                },
                TemplateField {
                    name: "terminal_type".to_owned(),
                    label: "Terminal type".to_owned(),
                    kind: FieldKind::Text,
                    required: false,
                    default: Some(config::DEFAULT_TERMINAL.to_owned()),
                },
                TemplateField {
                    name: "timeout".to_owned(),
                    label: "Connect timeout".to_owned(),
                    kind: FieldKind::Text,
                    required: false,
                    default: Some("10s".to_owned()),
                },
            ],
        })
    }

    async fn health_check(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn launch(&self, request: SessionRequest) -> Result<Arc<dyn SessionHandle>, DriverError> {
        let mut settings = SshSettings::parse(&request.settings)?;
        if let Some(timeout) = request.timeout {
            settings.timeout = timeout;
        }
        let secret = SshSecret::parse(&request.secret)?;

        debug!(
            host = %settings.host,
            port = settings.port,
            protocol = %request.protocol_id,
            "Dialing SSH target"
        );

        let ssh = self.connect(&settings, &secret).await?;

        let open_shell = !request.protocol_id.eq_ignore_ascii_case("sftp");
        let channel = if open_shell {
            let channel = match ssh.channel_open_session().await {
                Ok(channel) => channel,
                Err(err) => {
                    let _ = ssh.disconnect(Disconnect::ByApplication, "setup failed", "en").await;
                    return Err(DriverError::Upstream {
                        message: err.to_string().into(),
                        context: Some("Opening session channel".into()),
                    });
                },
            };

            let modes = [
                (Pty::ECHO, 1),
                (Pty::TTY_OP_ISPEED, 14_400),
                (Pty::TTY_OP_OSPEED, 14_400),
            ];
            let setup = async {
                channel
                    .request_pty(
                        false,
                        &settings.terminal_type,
                        settings.terminal_width,
                        settings.terminal_height,
                        0,
                        0,
                        &modes,
                    )
                    .await?;
                channel.request_shell(true).await?;
                Ok::<(), russh::Error>(())
            };
            if let Err(err) = setup.await {
                let _ = ssh.disconnect(Disconnect::ByApplication, "setup failed", "en").await;
                return Err(DriverError::Upstream {
                    message: err.to_string().into(),
                    context: Some("PTY/shell setup".into()),
                });
            }

            Some(channel)
        } else {
            None
        };

        let session_id = secret.session_id.clone().unwrap_or_else(|| safe_nanoid!());
        let handle = SshSessionHandle::new(session_id, ssh, channel);
        info!(
            session = handle.id(),
            host = %settings.host,
            port = settings.port,
            user = %request.user_id,
            "SSH session established"
        );
        Ok(Arc::new(handle))
    }
}

/// Convenience for wiring: the default timeout used when none is configured.
#[must_use]
pub fn default_connect_timeout() -> Duration {
    config::DEFAULT_TIMEOUT
}
