//! # sync-core
//!
//! Pure logic for splitsync (no I/O, instant tests).
//!
//! This crate implements the convergent data types, per-domain reducers and
//! the operation log bookkeeping without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take operations and produce
//! state without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic folds (same operation set → same state, in any order)
//! - Easy reasoning about conflicts
//!
//! The actual I/O (network, disk) is performed by `sync-client`, which owns
//! an [`OperationLog`] and feeds its operations through the reducers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod images;
pub mod issuer;
pub mod log;
pub mod reducer;
pub mod register;
pub mod sequence;
pub mod spendings;
pub mod users;

#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use images::{ImageChange, ImagesState, ImagesView};
pub use issuer::{IdIssuer, IssueError, DEFAULT_MAX_ATTEMPTS};
pub use log::{LogError, OperationLog, Origin, Status, StoredOperation};
pub use reducer::Reducer;
pub use register::{Register, Version};
pub use sequence::Sequence;
pub use spendings::{SpendingsChange, SpendingsState, SpendingsView};
pub use users::{UserChange, UserRecord, UsersState, UsersView};
