use crate::coordinator::{SessionCoordinator, StartSession};
use crate::error::SessionError;
use crate::recorder::{RecorderHandle, SessionRecorder};
use shellcn_domain::config::RecordingMode;
use shellcn_domain::connection::Connection;
use shellcn_domain::session::ActiveSession;
use shellcn_drivers::{Driver, DriverRegistry, SessionRequest};
use shellcn_iam::{Checker, ResourceRef};
use shellcn_repository::{ConnectionRepo, TargetRepo, UserRepo};
use shellcn_vault::CredentialVault;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An inbound request to activate a connection.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    pub connection_id: String,
    /// Must match the connection's protocol (case-insensitive) when present.
    pub protocol_id: Option<String>,
    /// Request-time setting overrides, highest precedence.
    pub overrides: BTreeMap<String, String>,
    /// Per-session recording toggle, honored only in `optional` mode.
    pub recording_enabled: Option<bool>,
    /// Whether the launching user consented to capture.
    pub consent_to_recording: bool,
}

/// The launch pipeline: resolve → authorize → decrypt → dial → register → record.
pub struct Launcher {
    connections: Arc<dyn ConnectionRepo>,
    targets: Arc<dyn TargetRepo>,
    users: Arc<dyn UserRepo>,
    checker: Arc<Checker>,
    vault: Arc<CredentialVault>,
    drivers: Arc<DriverRegistry>,
    coordinator: Arc<SessionCoordinator>,
    recorder: Arc<SessionRecorder>,
    default_concurrent_limit: u32,
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("default_concurrent_limit", &self.default_concurrent_limit)
            .finish_non_exhaustive()
    }
}

impl Launcher {
    #[must_use]
    pub fn new(
        connections: Arc<dyn ConnectionRepo>,
        targets: Arc<dyn TargetRepo>,
        users: Arc<dyn UserRepo>,
        checker: Arc<Checker>,
        vault: Arc<CredentialVault>,
        drivers: Arc<DriverRegistry>,
        coordinator: Arc<SessionCoordinator>,
        recorder: Arc<SessionRecorder>,
        default_concurrent_limit: u32,
    ) -> Self {
        Self {
            connections,
            targets,
            users,
            checker,
            vault,
            drivers,
            coordinator,
            recorder,
            default_concurrent_limit,
        }
    }

    /// Runs the full launch pipeline for `actor_id`.
    ///
    /// Cancellation-safe: dropping the future aborts in-flight dials, and a
    /// transport opened before a later failure is closed before returning.
    ///
    /// # Errors
    /// Every kind in [`SessionError`]; notably `NotFound` for hidden connections,
    /// `BadRequest` for protocol mismatches, `Forbidden` from the checker or
    /// vault, and the coordinator's capacity errors.
    pub async fn launch(
        &self,
        actor_id: &str,
        request: LaunchRequest,
    ) -> Result<ActiveSession, SessionError> {
        // 1. Resolve the connection, hiding rows the caller may not see.
        let connection = self.resolve_visible(actor_id, &request.connection_id).await?;
        let protocol_id = connection.protocol_id.to_lowercase();

        // 2. Requested protocol must match the connection's.
        if let Some(requested) = &request.protocol_id
            && !requested.eq_ignore_ascii_case(&protocol_id)
        {
            return Err(SessionError::BadRequest {
                message: format!(
                    "Requested protocol '{requested}' does not match connection protocol '{protocol_id}'"
                )
                .into(),
                context: None,
            });
        }

        // 3. Authorize launch and protocol connect on the connection resource.
        let resource = ResourceRef::new("connection", &connection.id);
        self.checker.require(actor_id, "connection.launch", Some(resource)).await?;
        self.checker
            .require(actor_id, &format!("protocol:{protocol_id}.connect"), Some(resource))
            .await?;

        // 4. The connection must carry an identity; vault sharing rules authorize
        //    its use.
        let identity_id =
            connection.identity_id.as_deref().ok_or_else(|| SessionError::BadRequest {
                message: "Connection has no linked identity".into(),
                context: None,
            })?;

        let driver =
            self.drivers.get(&protocol_id).ok_or_else(|| SessionError::BadRequest {
                message: format!("No driver registered for protocol '{protocol_id}'").into(),
                context: None,
            })?;

        // 5. Materialize effective settings: template defaults, connection
        //    settings, request overrides, then the resolved target.
        let mut settings = BTreeMap::new();
        if let Some(template) = driver.connection_template() {
            for (key, value) in template.defaults() {
                settings.insert(key, value);
            }
        }
        for (key, value) in &connection.settings {
            settings.insert(key.clone(), value.clone());
        }
        for (key, value) in &request.overrides {
            settings.insert(key.clone(), value.clone());
        }

        let (host, port) = self.resolve_target(&connection, &settings).await?;
        settings.insert("host".to_owned(), host.clone());
        settings.insert("port".to_owned(), port.to_string());

        // Capacity gate before any transport is opened.
        let limit = connection
            .concurrent_limit
            .or_else(|| driver.default_concurrent_limit())
            .unwrap_or(self.default_concurrent_limit);
        self.coordinator.check_capacity(&connection.id, actor_id, limit)?;

        // 6. Decrypt the identity payload into the driver-level secret.
        let secret = self.vault.read_identity_payload(identity_id, actor_id).await?;

        // 7. Open the transport. The driver parses its own timeout setting.
        let handle = driver
            .launch(SessionRequest {
                connection_id: connection.id.clone(),
                protocol_id: protocol_id.clone(),
                user_id: actor_id.to_owned(),
                settings,
                secret,
                timeout: None,
            })
            .await?;
        let guard = CloseOnDrop::new(Arc::clone(&handle));

        // Recording per deployment policy and driver capability, then
        // registration with the coordinator (which re-checks capacity under its
        // own mutex).
        let recorder = self.maybe_record(&request, &connection, driver.as_ref(), handle.id())?;
        let record = self
            .coordinator
            .start_session(StartSession {
                connection_id: connection.id.clone(),
                protocol_id,
                owner_id: actor_id.to_owned(),
                host,
                port,
                concurrent_limit: limit,
                handle: Arc::clone(&handle),
                recorder,
                owner_consented_to_recording: request.consent_to_recording,
            })
            .await?;

        guard.disarm();
        info!(session = %record.id, connection = %connection.id, "Launch complete");
        Ok(record)
    }

    async fn resolve_visible(
        &self,
        actor_id: &str,
        connection_id: &str,
    ) -> Result<Connection, SessionError> {
        let hidden = || SessionError::NotFound {
            message: format!("connection '{connection_id}'").into(),
            context: None,
        };

        let connection =
            self.connections.find_connection(connection_id).await.map_err(|_| hidden())?;

        if connection.owner_id == actor_id {
            return Ok(connection);
        }
        let actor = self.users.find_user(actor_id).await?;
        if actor.is_root {
            return Ok(connection);
        }
        if let Some(team_id) = &connection.team_id {
            let teams = self.users.teams_of(actor_id).await?;
            if teams.iter().any(|t| t == team_id) {
                return Ok(connection);
            }
        }
        // A launch grant makes the row visible even without ownership.
        let resource = ResourceRef::new("connection", &connection.id);
        if self.checker.check(actor_id, "connection.launch", Some(resource)).await? {
            return Ok(connection);
        }

        debug!(connection = connection_id, actor = actor_id, "Connection hidden from caller");
        Err(hidden())
    }

    async fn resolve_target(
        &self,
        connection: &Connection,
        settings: &BTreeMap<String, String>,
    ) -> Result<(String, u16), SessionError> {
        let targets = self.targets.targets_of(&connection.id).await?;
        if let Some(target) = targets.first() {
            return Ok((target.host.clone(), target.port));
        }

        // No explicit targets: fall back to host/port from settings.
        let host = settings
            .get("host")
            .map(|h| h.trim().to_owned())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| SessionError::BadRequest {
                message: "Connection has no target host".into(),
                context: None,
            })?;
        let port = match settings.get("port") {
            None => 22,
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| SessionError::BadRequest {
                message: "Target port is not a valid port number".into(),
                context: None,
            })?,
        };
        Ok((host, port))
    }

    fn maybe_record(
        &self,
        request: &LaunchRequest,
        connection: &Connection,
        driver: &dyn Driver,
        session_id: &str,
    ) -> Result<Option<RecorderHandle>, SessionError> {
        let config = self.recorder.config();
        let enabled = match config.mode {
            RecordingMode::Disabled => false,
            RecordingMode::Forced => true,
            RecordingMode::Optional => request.recording_enabled.unwrap_or_else(|| {
                connection
                    .settings
                    .get("recording_enabled")
                    .is_some_and(|v| matches!(v.trim(), "true" | "1" | "yes"))
            }),
        };

        if !enabled {
            return Ok(None);
        }
        if !driver.capabilities().session_recording {
            warn!(
                protocol = %connection.protocol_id,
                "Recording requested but the driver does not support it"
            );
            return Ok(None);
        }

        let width = connection
            .settings
            .get("terminal_width")
            .and_then(|w| w.parse().ok())
            .unwrap_or(80);
        let height = connection
            .settings
            .get("terminal_height")
            .and_then(|h| h.parse().ok())
            .unwrap_or(24);
        let term = connection
            .settings
            .get("terminal_type")
            .cloned()
            .unwrap_or_else(|| "xterm-256color".to_owned());

        self.recorder.start(session_id, width, height, &term).map(Some)
    }
}

/// Closes the transport unless the launch pipeline completes.
///
/// Covers both late-step failures and caller cancellation after the dial.
struct CloseOnDrop {
    handle: Option<Arc<dyn shellcn_drivers::SessionHandle>>,
}

impl CloseOnDrop {
    fn new(handle: Arc<dyn shellcn_drivers::SessionHandle>) -> Self {
        Self { handle: Some(handle) }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tokio::spawn(async move {
                let _ = handle.close().await;
            });
        }
    }
}
