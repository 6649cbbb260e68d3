//! Session lifecycle feature slice.
//!
//! * [`SessionCoordinator`]: the authoritative map of live sessions with
//!   concurrency caps, participants, the single write token, heartbeats,
//!   idempotent close, and graceful shutdown.
//! * [`SessionRecorder`]: bounded-buffer capture of terminal output into
//!   gzip-compressed, asciinema-style `.cast.gz` files with retention metadata.
//! * [`Launcher`]: the launch pipeline (resolve, authorize, decrypt, dial,
//!   register, record).

mod coordinator;
mod error;
mod launch;
mod recorder;

pub use coordinator::{SessionCoordinator, StartSession};
pub use error::{SessionError, SessionErrorExt};
pub use launch::{LaunchRequest, Launcher};
pub use recorder::{RecorderHandle, SessionRecorder, sweep_expired};
