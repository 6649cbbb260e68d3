//! IAM feature slice: declarative permissions, roles, and the access checker.
//!
//! The [`PermissionRegistry`] is populated once at startup: the core registers its
//! built-in set and every protocol driver contributes `protocol:<id>.*` permissions
//! when it registers. The [`Checker`] answers `check(user, permission, resource)`
//! on every privileged operation:
//!
//! 1. root users bypass everything, including permissions registered after the
//!    user row existed;
//! 2. the user's effective set is the union of role permissions, closed under
//!    `implies` and pruned of entries with unmet `depends_on`;
//! 3. globally scoped permissions pass on membership alone;
//! 4. resource-scoped permissions additionally need a live resource grant for the
//!    user or one of their teams.

mod builtin;
mod checker;
mod error;
mod registry;
mod roles;

pub use builtin::{protocol_permissions, register_builtin_permissions};
pub use checker::{Checker, ResourceRef};
pub use error::{IamError, IamErrorExt};
pub use registry::PermissionRegistry;
pub use roles::RoleAdmin;
