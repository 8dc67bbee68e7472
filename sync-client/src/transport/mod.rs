//! Transport abstraction for splitsync.
//!
//! The engine never talks to the network directly. It speaks the three-call
//! operation protocol through this trait:
//! - `push_operations()` hands a batch of locally authored operations to the server
//! - `confirm_operations()` acknowledges a batch by id
//! - `pull_operations()` fetches operations authored by other replicas
//!
//! Authentication is the implementation's business: a transport is bound to
//! one replica and carries its credential.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let unconfirmed = transport.push_operations(&batch).await?;
//! transport.confirm_operations(&ids).await?;
//! let learned = transport.pull_operations().await?;
//! ```

mod mock;
mod relay;

pub use mock::MockTransport;
pub use relay::{MemoryRelay, RelayTransport};

use async_trait::async_trait;
use sync_types::{Operation, OperationId};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server could not be reached.
    #[error("no connection")]
    NoConnection,

    /// The credential was refused.
    #[error("unauthorized")]
    Unauthorized,

    /// The server refused operations whose ids collide with existing ones.
    #[error("conflict on {} operation(s)", operation_ids.len())]
    Conflict {
        /// Operations the server refused.
        operation_ids: Vec<OperationId>,
    },

    /// The server answered with an error status.
    #[error("server error {status}: {message}")]
    Server {
        /// Status code reported by the server.
        status: u16,
        /// Server-provided description.
        message: String,
    },

    /// The server answered with something the protocol does not define.
    #[error("undocumented response: {0}")]
    Undocumented(String),
}

impl TransportError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::NoConnection => true,
            TransportError::Server { status, .. } => *status >= 500,
            TransportError::Unauthorized
            | TransportError::Conflict { .. }
            | TransportError::Undocumented(_) => false,
        }
    }
}

/// Operation protocol spoken with the server.
///
/// Implementations handle the underlying mechanism (HTTP, in-process relay,
/// mock).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Push a batch of locally authored operations.
    ///
    /// Returns the operations the server still expects to be confirmed.
    /// Pushed ids missing from the response were acknowledged outright; ids
    /// that were not pushed are operations the caller must also store.
    async fn push_operations(&self, batch: &[Operation]) -> Result<Vec<Operation>, TransportError>;

    /// Acknowledge a batch of operations by id.
    async fn confirm_operations(&self, ids: &[OperationId]) -> Result<(), TransportError>;

    /// Fetch operations authored by other replicas that are not yet confirmed.
    async fn pull_operations(&self) -> Result<Vec<Operation>, TransportError>;
}
