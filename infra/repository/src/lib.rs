//! Persistence contracts.
//!
//! The core never talks to a database directly: it programs against the
//! capability-scoped repository traits defined here. The contract every backend
//! must honor:
//!
//! * unique-constraint violations surface as [`RepoError::AlreadyExists`];
//! * missing-row lookups surface as [`RepoError::NotFound`];
//! * multi-write operations are single methods taking a [`TxContext`] and apply
//!   all of their writes atomically with respect to concurrent readers;
//! * cascades (connection → targets → grants) happen inside those methods, not
//!   in database triggers.
//!
//! [`MemoryStore`] implements every trait over `parking_lot`-guarded maps. It backs
//! the test suites and single-node deployments; a SQL adapter implements the same
//! traits against real transactions.

mod error;
mod memory;
mod traits;
mod tx;

pub use error::{RepoError, RepoErrorExt};
pub use memory::MemoryStore;
pub use traits::{
    ConnectionRepo, CredentialVersionRepo, GrantRepo, IdentityRepo, KeyMetaRepo, PermissionRepo,
    RecordRepo, RoleRepo, SessionFilter, SessionRepo, ShareRepo, TargetRepo, UserRepo,
};
pub use tx::TxContext;
