//! Protocol drivers.
//!
//! A process-wide registry maps lowercase protocol ids to [`Driver`]
//! implementations. Registering a driver also contributes its
//! `protocol:<id>.connect` / `.share` / `.grant_write` permissions to the IAM
//! registry. Registration is one-shot per id and duplicates fail at startup.
//!
//! The SSH driver dials the target over TCP, authenticates with a key or
//! password from the vault payload, opens an interactive PTY shell, and can
//! multiplex one SFTP subsystem client over the same transport with reference
//! counting. `protocol_id = "sftp"` skips the PTY entirely.

mod driver;
mod error;
mod registry;
pub mod ssh;

pub use driver::{Driver, SessionHandle, SessionRequest};
pub use error::{DriverError, DriverErrorExt};
pub use registry::DriverRegistry;
pub use ssh::{AcceptAllVerifier, HostKeyVerifier, PinnedFingerprintVerifier, SshDriver};
