use crate::error::SessionError;
use crate::recorder::RecorderHandle;
use chrono::{Duration as ChronoDuration, Utc};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use shellcn_domain::events::{SessionEventKind, SessionLifecycleEvent};
use shellcn_domain::session::{AccessMode, ActiveSession, Participant, ParticipantRole};
use shellcn_drivers::SessionHandle;
use shellcn_event_bus::EventBus;
use shellcn_kernel::safe_nanoid;
use shellcn_repository::{SessionFilter, SessionRepo};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const OUTPUT_FANOUT_CAPACITY: usize = 256;

/// Everything needed to register a freshly launched session.
pub struct StartSession {
    pub connection_id: String,
    pub protocol_id: String,
    pub owner_id: String,
    pub host: String,
    pub port: u16,
    pub concurrent_limit: u32,
    pub handle: Arc<dyn SessionHandle>,
    pub recorder: Option<RecorderHandle>,
    pub owner_consented_to_recording: bool,
}

impl std::fmt::Debug for StartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartSession")
            .field("connection_id", &self.connection_id)
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

struct LiveSession {
    record: ActiveSession,
    handle: Arc<dyn SessionHandle>,
    recorder: Option<RecorderHandle>,
    output: broadcast::Sender<Vec<u8>>,
}

#[derive(Default)]
struct CoordinatorState {
    sessions: FxHashMap<String, LiveSession>,
}

/// The authoritative registry of live sessions.
///
/// All state mutations are serialized through one mutex; listings and lookups
/// return copies so iteration never races mutation. I/O (handle close, row
/// persistence, recorder finalization) happens outside the lock.
pub struct SessionCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
    sessions_repo: Arc<dyn SessionRepo>,
    events: EventBus,
    require_consent: bool,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("live", &self.state.lock().sessions.len())
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    #[must_use]
    pub fn new(sessions_repo: Arc<dyn SessionRepo>, events: EventBus, require_consent: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoordinatorState::default())),
            sessions_repo,
            events,
            require_consent,
        }
    }

    fn publish(&self, session_id: &str, kind: SessionEventKind) {
        let _ = self.events.publish(SessionLifecycleEvent {
            session_id: session_id.to_owned(),
            at: Utc::now(),
            kind,
        });
    }

    /// Checks the concurrency gates without touching anything.
    ///
    /// The launcher calls this before opening a transport; [`Self::start_session`]
    /// re-checks under the same mutex to close the race.
    ///
    /// # Errors
    /// * [`SessionError::ActiveSessionExists`] if `owner_id` already has a live
    ///   session on the connection.
    /// * [`SessionError::ConcurrentLimitReached`] carrying the effective limit.
    pub fn check_capacity(
        &self,
        connection_id: &str,
        owner_id: &str,
        limit: u32,
    ) -> Result<(), SessionError> {
        let state = self.state.lock();
        Self::check_capacity_locked(&state, connection_id, owner_id, limit)
    }

    fn check_capacity_locked(
        state: &CoordinatorState,
        connection_id: &str,
        owner_id: &str,
        limit: u32,
    ) -> Result<(), SessionError> {
        let live_on_connection = state
            .sessions
            .values()
            .filter(|s| s.record.connection_id == connection_id && !s.record.is_closed());

        let mut count = 0u32;
        for session in live_on_connection {
            if session.record.owner_id == owner_id {
                return Err(SessionError::ActiveSessionExists { context: None });
            }
            count += 1;
        }

        if count >= limit {
            return Err(SessionError::ConcurrentLimitReached { limit, context: None });
        }
        Ok(())
    }

    /// Registers a launched session: creates the record with the owner as the
    /// write-holding participant, persists it, wires output fan-out and the
    /// recorder tee, and emits the lifecycle event.
    ///
    /// # Errors
    /// The capacity errors of [`Self::check_capacity`], plus repository failures
    /// (the in-memory registration is rolled back on persist failure).
    pub async fn start_session(&self, params: StartSession) -> Result<ActiveSession, SessionError> {
        let now = Utc::now();
        let session_id = params.handle.id().to_owned();
        let recording = params.recorder.is_some();

        let record = {
            let mut state = self.state.lock();
            Self::check_capacity_locked(
                &state,
                &params.connection_id,
                &params.owner_id,
                params.concurrent_limit,
            )?;

            let mut participants = std::collections::BTreeMap::new();
            participants.insert(params.owner_id.clone(), Participant {
                user_id: params.owner_id.clone(),
                role: ParticipantRole::Owner,
                access_mode: AccessMode::Write,
                joined_at: now,
                left_at: None,
                last_seen_at: now,
                consented_to_recording: params.owner_consented_to_recording,
            });

            let record = ActiveSession {
                id: session_id.clone(),
                connection_id: params.connection_id.clone(),
                protocol_id: params.protocol_id.clone(),
                owner_id: params.owner_id.clone(),
                host: params.host.clone(),
                port: params.port,
                concurrent_limit: params.concurrent_limit,
                started_at: now,
                last_seen_at: now,
                closed_at: None,
                participants,
                write_holder: Some(params.owner_id.clone()),
                recording,
            };

            let (output_tx, _) = broadcast::channel(OUTPUT_FANOUT_CAPACITY);
            state.sessions.insert(session_id.clone(), LiveSession {
                record: record.clone(),
                handle: Arc::clone(&params.handle),
                recorder: params.recorder,
                output: output_tx,
            });
            record
        };

        // Tee remote output into the fan-out channel and the recorder.
        self.spawn_output_tee(&session_id);

        if let Err(err) = self.sessions_repo.insert_session(record.clone()).await {
            self.state.lock().sessions.remove(&session_id);
            return Err(err.into());
        }

        self.publish(&session_id, SessionEventKind::Started);
        if recording {
            self.publish(&session_id, SessionEventKind::RecordingStarted);
        }
        info!(
            session = %session_id,
            connection = %record.connection_id,
            owner = %record.owner_id,
            "Session registered"
        );
        Ok(record)
    }

    fn spawn_output_tee(&self, session_id: &str) {
        let (stdout, stderr, output, feed_recorder) = {
            let state = self.state.lock();
            let Some(live) = state.sessions.get(session_id) else { return };
            (
                live.handle.take_stdout(),
                live.handle.take_stderr(),
                live.output.clone(),
                live.recorder.is_some(),
            )
        };

        for receiver in [stdout, stderr].into_iter().flatten() {
            let mut receiver = receiver;
            let output = output.clone();
            let session_id = session_id.to_owned();
            let shared_state = Arc::clone(&self.state);
            tokio::spawn(async move {
                while let Some(bytes) = receiver.recv().await {
                    if feed_recorder {
                        let state = shared_state.lock();
                        if let Some(live) = state.sessions.get(&session_id)
                            && let Some(recorder) = &live.recorder
                        {
                            recorder.feed_output(bytes.clone());
                        }
                    }
                    // No subscribers is fine; participants may not be attached yet.
                    let _ = output.send(bytes);
                }
            });
        }
    }

    async fn persist(&self, record: ActiveSession) {
        // Participant churn must not fail the interactive path; persistence of
        // snapshots is best-effort and logged.
        if let Err(err) = self.sessions_repo.update_session(record).await {
            warn!(error = %err, "Failed to persist session snapshot");
        }
    }

    /// Subscribes to the session's merged output stream.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] when the session is not live.
    pub fn subscribe_output(
        &self,
        session_id: &str,
    ) -> Result<broadcast::Receiver<Vec<u8>>, SessionError> {
        let state = self.state.lock();
        state
            .sessions
            .get(session_id)
            .map(|live| live.output.subscribe())
            .ok_or_else(|| SessionError::NotFound {
                message: format!("session '{session_id}'").into(),
                context: None,
            })
    }

    /// Forwards keystrokes from the write holder to the remote shell.
    ///
    /// # Errors
    /// * [`SessionError::Forbidden`] when `user_id` does not hold the write token.
    /// * [`SessionError::NotFound`] when the session is not live.
    pub async fn write_input(
        &self,
        session_id: &str,
        user_id: &str,
        bytes: &[u8],
    ) -> Result<(), SessionError> {
        let handle = {
            let state = self.state.lock();
            let live = state.sessions.get(session_id).ok_or_else(|| SessionError::NotFound {
                message: format!("session '{session_id}'").into(),
                context: None,
            })?;
            if live.record.write_holder.as_deref() != Some(user_id) {
                return Err(SessionError::Forbidden {
                    message: "Write token is held by another participant".into(),
                    context: None,
                });
            }
            if let Some(recorder) = &live.recorder {
                let consented = live
                    .record
                    .participants
                    .get(user_id)
                    .is_some_and(|p| p.consented_to_recording);
                recorder.feed_input(consented || !self.require_consent, bytes.to_vec());
            }
            Arc::clone(&live.handle)
        };

        handle.write_stdin(bytes).await?;
        Ok(())
    }

    /// Propagates a window resize from the write holder.
    ///
    /// # Errors
    /// Same as [`Self::write_input`].
    pub async fn resize(
        &self,
        session_id: &str,
        user_id: &str,
        cols: u32,
        rows: u32,
    ) -> Result<(), SessionError> {
        let handle = {
            let state = self.state.lock();
            let live = state.sessions.get(session_id).ok_or_else(|| SessionError::NotFound {
                message: format!("session '{session_id}'").into(),
                context: None,
            })?;
            if live.record.write_holder.as_deref() != Some(user_id) {
                return Err(SessionError::Forbidden {
                    message: "Write token is held by another participant".into(),
                    context: None,
                });
            }
            Arc::clone(&live.handle)
        };
        handle.resize(cols, rows).await?;
        Ok(())
    }

    /// Adds a participant. At most one write holder exists at any time: when the
    /// token is taken, a write request degrades to read and a later
    /// [`Self::grant_write`] transfers it.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] when the session is not live.
    pub async fn attach_participant(
        &self,
        session_id: &str,
        user_id: &str,
        requested: AccessMode,
        consented_to_recording: bool,
    ) -> Result<Participant, SessionError> {
        let (participant, record) = {
            let mut state = self.state.lock();
            let live = state.sessions.get_mut(session_id).ok_or_else(|| {
                SessionError::NotFound {
                    message: format!("session '{session_id}'").into(),
                    context: None,
                }
            })?;
            if live.record.is_closed() {
                return Err(SessionError::Canceled {
                    message: "Session is closed".into(),
                    context: None,
                });
            }

            let now = Utc::now();
            let granted_mode = if requested == AccessMode::Write
                && live.record.write_holder.is_none()
            {
                live.record.write_holder = Some(user_id.to_owned());
                AccessMode::Write
            } else {
                AccessMode::Read
            };

            let participant = live
                .record
                .participants
                .entry(user_id.to_owned())
                .and_modify(|p| {
                    p.left_at = None;
                    p.last_seen_at = now;
                    p.access_mode = granted_mode;
                    p.consented_to_recording = consented_to_recording;
                })
                .or_insert(Participant {
                    user_id: user_id.to_owned(),
                    role: ParticipantRole::Viewer,
                    access_mode: granted_mode,
                    joined_at: now,
                    left_at: None,
                    last_seen_at: now,
                    consented_to_recording,
                })
                .clone();

            self.publish(session_id, SessionEventKind::ParticipantJoined {
                user_id: user_id.to_owned(),
            });
            if granted_mode == AccessMode::Write {
                self.publish(session_id, SessionEventKind::WriteGranted {
                    user_id: user_id.to_owned(),
                });
            }
            (participant, live.record.clone())
        };

        self.persist(record).await;
        Ok(participant)
    }

    /// Transfers the write token (permission checked by the caller against
    /// `protocol:<id>.grant_write`).
    ///
    /// # Errors
    /// [`SessionError::NotFound`] for unknown sessions or participants.
    pub async fn grant_write(&self, session_id: &str, user_id: &str) -> Result<(), SessionError> {
        let record = {
            let mut state = self.state.lock();
            let live = state.sessions.get_mut(session_id).ok_or_else(|| {
                SessionError::NotFound {
                    message: format!("session '{session_id}'").into(),
                    context: None,
                }
            })?;
            if !live.record.participants.contains_key(user_id) {
                return Err(SessionError::NotFound {
                    message: format!("participant '{user_id}'").into(),
                    context: None,
                });
            }

            if let Some(previous) = live.record.write_holder.take()
                && let Some(p) = live.record.participants.get_mut(&previous)
            {
                p.access_mode = AccessMode::Read;
            }
            live.record.write_holder = Some(user_id.to_owned());
            if let Some(p) = live.record.participants.get_mut(user_id) {
                p.access_mode = AccessMode::Write;
            }

            self.publish(session_id, SessionEventKind::WriteGranted {
                user_id: user_id.to_owned(),
            });
            live.record.clone()
        };

        self.persist(record).await;
        Ok(())
    }

    /// Releases the write token; nobody holds it until the next grant.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] / [`SessionError::Forbidden`].
    pub async fn relinquish_write(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<(), SessionError> {
        let record = {
            let mut state = self.state.lock();
            let live = state.sessions.get_mut(session_id).ok_or_else(|| {
                SessionError::NotFound {
                    message: format!("session '{session_id}'").into(),
                    context: None,
                }
            })?;
            if live.record.write_holder.as_deref() != Some(user_id) {
                return Err(SessionError::Forbidden {
                    message: "Caller does not hold the write token".into(),
                    context: None,
                });
            }
            live.record.write_holder = None;
            if let Some(p) = live.record.participants.get_mut(user_id) {
                p.access_mode = AccessMode::Read;
            }
            self.publish(session_id, SessionEventKind::WriteReleased);
            live.record.clone()
        };

        self.persist(record).await;
        Ok(())
    }

    /// Marks a participant as gone, releasing the write token if they held it.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] when the session is not live.
    pub async fn detach_participant(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<(), SessionError> {
        let record = {
            let mut state = self.state.lock();
            let live = state.sessions.get_mut(session_id).ok_or_else(|| {
                SessionError::NotFound {
                    message: format!("session '{session_id}'").into(),
                    context: None,
                }
            })?;
            let now = Utc::now();
            if let Some(p) = live.record.participants.get_mut(user_id) {
                p.left_at = Some(now);
            }
            if live.record.write_holder.as_deref() == Some(user_id) {
                live.record.write_holder = None;
                self.publish(session_id, SessionEventKind::WriteReleased);
            }
            self.publish(session_id, SessionEventKind::ParticipantLeft {
                user_id: user_id.to_owned(),
            });
            live.record.clone()
        };

        self.persist(record).await;
        Ok(())
    }

    /// Refreshes liveness timestamps for the session and the participant.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] when the session is not live.
    pub fn heartbeat(&self, session_id: &str, user_id: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let live = state.sessions.get_mut(session_id).ok_or_else(|| SessionError::NotFound {
            message: format!("session '{session_id}'").into(),
            context: None,
        })?;
        let now = Utc::now();
        live.record.last_seen_at = now;
        if let Some(p) = live.record.participants.get_mut(user_id) {
            p.last_seen_at = now;
        }
        Ok(())
    }

    /// Closes a session: drains state under the lock, then closes the transport,
    /// finalizes the recorder, persists the row, and emits the lifecycle event.
    ///
    /// Idempotent: closing an unknown or already-closed session returns the
    /// persisted record.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] when the session never existed.
    pub async fn close_session(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<ActiveSession, SessionError> {
        let taken = {
            let mut state = self.state.lock();
            state.sessions.remove(session_id)
        };

        let Some(mut live) = taken else {
            // Already closed (or never live): fall back to the persisted row.
            return Ok(self.sessions_repo.find_session(session_id).await?);
        };

        let now = Utc::now();
        live.record.closed_at = Some(now);
        for participant in live.record.participants.values_mut() {
            if participant.left_at.is_none() {
                participant.left_at = Some(now);
            }
        }
        live.record.write_holder = None;

        if let Err(err) = live.handle.close().await {
            warn!(session = session_id, error = %err, "Transport close failed");
        }

        let mut record_id = None;
        if let Some(recorder) = live.recorder.take() {
            match recorder.stop().await {
                Ok(row) => record_id = Some(row.id),
                Err(err) => warn!(session = session_id, error = %err, "Recorder finalization failed"),
            }
            self.publish(session_id, SessionEventKind::RecordingStopped {
                record_id: record_id.clone(),
            });
        }

        if let Err(err) = self.sessions_repo.update_session(live.record.clone()).await {
            warn!(session = session_id, error = %err, "Failed to persist closed session");
        }

        self.publish(session_id, SessionEventKind::Closed { reason: reason.to_owned() });
        info!(session = session_id, reason, "Session closed");
        Ok(live.record)
    }

    /// Immutable snapshot of one session.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] when neither live nor persisted.
    pub async fn get_session(&self, session_id: &str) -> Result<ActiveSession, SessionError> {
        if let Some(live) = self.state.lock().sessions.get(session_id) {
            return Ok(live.record.clone());
        }
        Ok(self.sessions_repo.find_session(session_id).await?)
    }

    /// Immutable snapshots of live sessions matching the filter.
    #[must_use]
    pub fn list_sessions(&self, filter: &SessionFilter) -> Vec<ActiveSession> {
        let state = self.state.lock();
        state
            .sessions
            .values()
            .map(|live| live.record.clone())
            .filter(|record| {
                filter.connection_id.as_deref().is_none_or(|c| record.connection_id == c)
                    && filter.owner_id.as_deref().is_none_or(|o| record.owner_id == o)
            })
            .collect()
    }

    /// Closes sessions whose heartbeat is older than `ttl`.
    pub async fn sweep_stale(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0));
        let stale: Vec<String> = {
            let state = self.state.lock();
            state
                .sessions
                .values()
                .filter(|live| live.record.last_seen_at < cutoff)
                .map(|live| live.record.id.clone())
                .collect()
        };

        let mut closed = 0;
        for session_id in stale {
            if self.close_session(&session_id, "stale heartbeat").await.is_ok() {
                closed += 1;
            }
        }
        closed
    }

    /// Closes every live session, bounded by `grace`; sessions that do not close
    /// in time are forcibly dropped from the registry.
    pub async fn shutdown(&self, grace: Duration) {
        let ids: Vec<String> =
            { self.state.lock().sessions.keys().cloned().collect() };
        debug!(count = ids.len(), "Coordinator shutdown");

        let close_all = async {
            for session_id in &ids {
                let _ = self.close_session(session_id, "shutdown").await;
            }
        };

        if tokio::time::timeout(grace, close_all).await.is_err() {
            warn!("Shutdown grace elapsed; forcibly releasing remaining sessions");
            self.state.lock().sessions.clear();
        }
    }

    /// Generates a session id for drivers that want the coordinator to pick one.
    #[must_use]
    pub fn next_session_id() -> String {
        safe_nanoid!()
    }
}
