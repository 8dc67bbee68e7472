//! # sync-types
//!
//! Operation and identifier types for the splitsync operation log.
//!
//! This crate provides the foundational types used across all splitsync crates:
//! - [`OperationId`], [`UserId`], [`GroupId`], [`SpendingId`], [`ImageId`] - Identifiers
//! - [`Operation`], [`Payload`], [`Stamp`] - The unit of replication
//! - [`User`], [`SpendingGroup`], [`Spending`], [`Image`] - Materialized values
//! - [`CodecError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod operation;
mod values;

pub use error::CodecError;
pub use ids::{GroupId, ImageId, OperationId, RandomId, SpendingId, UserId, ID_LEN};
pub use operation::{EntityRef, Operation, Payload, Stamp};
pub use values::{content_digest, ContentDigest, Image, Share, Spending, SpendingGroup, User};
