//! Session capture.
//!
//! The recorder consumes terminal bytes through a bounded channel so the session
//! itself never blocks on disk I/O. Streams are written as a gzip-compressed,
//! asciinema-style file: one JSON header line, then newline-delimited
//! `[elapsed_seconds, channel, payload_base64]` events. Finalization flushes,
//! fsyncs, renames away the `.tmp` suffix, and records checksum, size, duration,
//! and retention metadata.

use crate::error::SessionError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{Duration as ChronoDuration, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::json;
use sha2::{Digest, Sha256};
use shellcn_domain::config::RecordingConfig;
use shellcn_domain::session::SessionRecord;
use shellcn_kernel::safe_nanoid;
use shellcn_repository::RecordRepo;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CAPTURE_CAPACITY: usize = 512;
const OUTPUT_CHANNEL: &str = "o";
const INPUT_CHANNEL: &str = "i";
const MARKER_CHANNEL: &str = "m";
const DEGRADED_MARKER: &[u8] = b"capture degraded: events dropped";

enum CaptureEvent {
    Output(Vec<u8>),
    Input(Vec<u8>),
    Stop,
}

/// Factory for per-session capture tasks.
pub struct SessionRecorder {
    config: RecordingConfig,
    records: Arc<dyn RecordRepo>,
}

impl std::fmt::Debug for SessionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecorder").field("config", &self.config).finish_non_exhaustive()
    }
}

impl SessionRecorder {
    #[must_use]
    pub fn new(config: RecordingConfig, records: Arc<dyn RecordRepo>) -> Self {
        Self { config, records }
    }

    #[must_use]
    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// Starts capture for a session and returns the feeding handle.
    ///
    /// # Errors
    /// [`SessionError::Internal`] when the capture directory or file cannot be
    /// created.
    pub fn start(
        &self,
        session_id: &str,
        width: u32,
        height: u32,
        term: &str,
    ) -> Result<RecorderHandle, SessionError> {
        fs::create_dir_all(&self.config.dir).map_err(|e| SessionError::Internal {
            message: e.to_string().into(),
            context: Some("Creating recording directory".into()),
        })?;

        let final_path = self.config.dir.join(format!("{session_id}.cast.gz"));
        let tmp_path = self.config.dir.join(format!("{session_id}.cast.gz.tmp"));

        let file = fs::File::create(&tmp_path).map_err(|e| SessionError::Internal {
            message: e.to_string().into(),
            context: Some("Creating recording file".into()),
        })?;
        let mut encoder = GzEncoder::new(file, Compression::default());

        let header = json!({
            "version": 2,
            "width": width,
            "height": height,
            "term": term,
            "timestamp": Utc::now().timestamp(),
        });
        writeln!(encoder, "{header}").map_err(|e| SessionError::Internal {
            message: e.to_string().into(),
            context: Some("Writing recording header".into()),
        })?;

        let (tx, rx) = mpsc::channel(CAPTURE_CAPACITY);
        let degraded = Arc::new(AtomicBool::new(false));
        let marker_pending = Arc::new(AtomicBool::new(false));

        let writer = Writer {
            session_id: session_id.to_owned(),
            encoder,
            tmp_path,
            final_path,
            started: Instant::now(),
            last_elapsed: 0.0,
            marker_pending: Arc::clone(&marker_pending),
            records: Arc::clone(&self.records),
            retention_days: self.config.retention_days,
        };
        let task = tokio::spawn(writer.run(rx));

        debug!(session = session_id, "Recording started");
        Ok(RecorderHandle { tx, task, degraded, marker_pending })
    }
}

/// Feeding side of a capture task.
///
/// All feeds are non-blocking: when the bounded buffer overflows, the recorder
/// flips to a degraded state, a marker event lands in the stream, and the
/// session continues untouched.
#[derive(Debug)]
pub struct RecorderHandle {
    tx: mpsc::Sender<CaptureEvent>,
    task: JoinHandle<Result<SessionRecord, SessionError>>,
    degraded: Arc<AtomicBool>,
    marker_pending: Arc<AtomicBool>,
}

impl RecorderHandle {
    /// Captures remote output bytes.
    pub fn feed_output(&self, bytes: Vec<u8>) {
        self.feed(CaptureEvent::Output(bytes));
    }

    /// Captures a participant's input. Unconsented input is counted but never
    /// written.
    pub fn feed_input(&self, consented: bool, bytes: Vec<u8>) {
        if !consented {
            return;
        }
        self.feed(CaptureEvent::Input(bytes));
    }

    fn feed(&self, event: CaptureEvent) {
        if self.tx.try_send(event).is_err()
            && !self.degraded.swap(true, Ordering::AcqRel)
        {
            warn!("Recorder buffer overflow; capture degraded");
            self.marker_pending.store(true, Ordering::Release);
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Finalizes the capture and returns the persisted record row.
    ///
    /// # Errors
    /// [`SessionError::Internal`] when finalization fails.
    pub async fn stop(self) -> Result<SessionRecord, SessionError> {
        let _ = self.tx.send(CaptureEvent::Stop).await;
        self.task.await.map_err(|e| SessionError::Internal {
            message: e.to_string().into(),
            context: Some("Recorder task join".into()),
        })?
    }
}

struct Writer {
    session_id: String,
    encoder: GzEncoder<fs::File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    started: Instant,
    last_elapsed: f64,
    marker_pending: Arc<AtomicBool>,
    records: Arc<dyn RecordRepo>,
    retention_days: Option<u32>,
}

impl Writer {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<CaptureEvent>,
    ) -> Result<SessionRecord, SessionError> {
        while let Some(event) = rx.recv().await {
            if self.marker_pending.swap(false, Ordering::AcqRel) {
                self.write_event(MARKER_CHANNEL, DEGRADED_MARKER)?;
            }
            match event {
                CaptureEvent::Output(bytes) => self.write_event(OUTPUT_CHANNEL, &bytes)?,
                CaptureEvent::Input(bytes) => self.write_event(INPUT_CHANNEL, &bytes)?,
                CaptureEvent::Stop => break,
            }
        }
        self.finalize().await
    }

    fn write_event(&mut self, channel: &str, payload: &[u8]) -> Result<(), SessionError> {
        let elapsed = self.started.elapsed().as_secs_f64();
        self.last_elapsed = elapsed;
        let line = json!([elapsed, channel, BASE64.encode(payload)]);
        writeln!(self.encoder, "{line}").map_err(|e| SessionError::Internal {
            message: e.to_string().into(),
            context: Some("Writing capture event".into()),
        })
    }

    async fn finalize(self) -> Result<SessionRecord, SessionError> {
        let internal = |context: &'static str| {
            move |e: std::io::Error| SessionError::Internal {
                message: e.to_string().into(),
                context: Some(context.into()),
            }
        };

        let file = self.encoder.finish().map_err(internal("Finishing gzip stream"))?;
        file.sync_all().map_err(internal("Syncing recording file"))?;
        drop(file);

        fs::rename(&self.tmp_path, &self.final_path)
            .map_err(internal("Renaming recording into place"))?;

        let bytes = fs::read(&self.final_path).map_err(internal("Hashing recording file"))?;
        let checksum = hex::encode(Sha256::digest(&bytes));
        let size_bytes = bytes.len() as u64;

        let retention_until = self
            .retention_days
            .map(|days| Utc::now() + ChronoDuration::days(i64::from(days)));

        let record = SessionRecord {
            id: safe_nanoid!(),
            session_id: self.session_id.clone(),
            storage_kind: "file".to_owned(),
            storage_path: self.final_path.display().to_string(),
            size_bytes,
            duration_secs: self.last_elapsed,
            checksum,
            retention_until,
            protected: false,
            created_at: Utc::now(),
        };

        let record = self.records.insert_record(record).await?;
        info!(
            session = %self.session_id,
            record = %record.id,
            size = size_bytes,
            "Recording finalized"
        );
        Ok(record)
    }
}

/// Deletes unprotected records whose retention has lapsed, file and row both.
///
/// # Errors
/// Propagates repository failures; per-file removal errors are logged and skipped.
pub async fn sweep_expired(records: &dyn RecordRepo) -> Result<usize, SessionError> {
    let expired = records.list_expired_records(Utc::now()).await?;
    let mut removed = 0;
    for record in expired {
        if let Err(err) = fs::remove_file(&record.storage_path) {
            warn!(record = %record.id, error = %err, "Failed to delete recording file");
        }
        records.delete_record(&record.id).await?;
        removed += 1;
    }
    Ok(removed)
}
