//! Operation log with per-entry sync status.
//!
//! Every operation the replica knows about lives here exactly once, keyed by
//! its id, together with where it came from and how far it has progressed
//! through the push/confirm protocol:
//!
//! 1. `record_local()` - authored here, status `PendingSync`
//! 2. `mark_pushed()` - accepted by the server, `PendingConfirm` or `Synced`
//! 3. `mark_synced()` - acknowledged, no longer a sync liability
//!
//! Operations pulled from the server enter via `record_remote()` as
//! `PendingConfirm`. Entries only leave the log through `reject()` (server
//! conflict) or `unrecord()` (local persistence failed).
//!
//! The log is pure bookkeeping: the engine persists the entries each call
//! returns and performs all network I/O.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sync_types::{Operation, OperationId};
use thiserror::Error;

/// Sync status of a stored operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Authored locally, not yet pushed (or the push failed).
    PendingSync,
    /// Pushed and awaiting acknowledgement, or pulled and awaiting confirm.
    PendingConfirm,
    /// Fully acknowledged.
    Synced,
}

/// Where a stored operation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Authored by this replica.
    Local,
    /// Learned from the network.
    Remote,
}

/// One entry of the operation log, as persisted by the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredOperation {
    /// The immutable operation.
    pub operation: Operation,
    /// Progress through the sync protocol.
    pub status: Status,
    /// Local or remote.
    pub origin: Origin,
}

impl StoredOperation {
    /// Id of the wrapped operation.
    pub fn id(&self) -> OperationId {
        self.operation.id()
    }
}

/// Error type for log operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// An operation with this id is already recorded.
    #[error("operation {0} is already in the log")]
    Duplicate(OperationId),
}

/// The canonical operation log of one replica.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: BTreeMap<OperationId, StoredOperation>,
}

impl OperationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted entries. Later duplicates win.
    pub fn restore(entries: impl IntoIterator<Item = StoredOperation>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id(), e)).collect(),
        }
    }

    /// Record an operation authored by this replica as `PendingSync`.
    pub fn record_local(&mut self, operation: Operation) -> Result<StoredOperation, LogError> {
        let id = operation.id();
        if self.entries.contains_key(&id) {
            return Err(LogError::Duplicate(id));
        }
        let entry = StoredOperation {
            operation,
            status: Status::PendingSync,
            origin: Origin::Local,
        };
        self.entries.insert(id, entry.clone());
        Ok(entry)
    }

    /// Record operations learned from the network as `PendingConfirm`.
    ///
    /// Ids already in the log are skipped. Returns the new entries.
    pub fn record_remote(
        &mut self,
        operations: impl IntoIterator<Item = Operation>,
    ) -> Vec<StoredOperation> {
        let mut recorded = Vec::new();
        for operation in operations {
            let id = operation.id();
            if self.entries.contains_key(&id) {
                continue;
            }
            let entry = StoredOperation {
                operation,
                status: Status::PendingConfirm,
                origin: Origin::Remote,
            };
            self.entries.insert(id, entry.clone());
            recorded.push(entry);
        }
        recorded
    }

    /// Drop an entry whose local persistence failed.
    pub fn unrecord(&mut self, id: &OperationId) -> Option<StoredOperation> {
        self.entries.remove(id)
    }

    /// Operations waiting to be pushed, in log order.
    pub fn pending_sync(&self) -> Vec<Operation> {
        self.sorted(|entry| entry.status == Status::PendingSync)
    }

    /// Ids waiting for confirmation, in log order.
    pub fn pending_confirm_ids(&self) -> Vec<OperationId> {
        self.sorted(|entry| entry.status == Status::PendingConfirm)
            .into_iter()
            .map(|op| op.id())
            .collect()
    }

    /// Advance pushed operations.
    ///
    /// Ids listed in `unconfirmed` move to `PendingConfirm`, the rest were
    /// acknowledged by the same response and move straight to `Synced`.
    /// Ids that are no longer `PendingSync` are left alone. Returns the
    /// changed entries.
    pub fn mark_pushed(
        &mut self,
        ids: &[OperationId],
        unconfirmed: &BTreeSet<OperationId>,
    ) -> Vec<StoredOperation> {
        let mut changed = Vec::new();
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                if entry.status != Status::PendingSync {
                    continue;
                }
                entry.status = if unconfirmed.contains(id) {
                    Status::PendingConfirm
                } else {
                    Status::Synced
                };
                changed.push(entry.clone());
            }
        }
        changed
    }

    /// Mark confirmed operations `Synced`. Returns the changed entries.
    pub fn mark_synced(&mut self, ids: &[OperationId]) -> Vec<StoredOperation> {
        let mut changed = Vec::new();
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                if entry.status == Status::PendingConfirm {
                    entry.status = Status::Synced;
                    changed.push(entry.clone());
                }
            }
        }
        changed
    }

    /// Remove operations the server refused. Returns the removed operations.
    pub fn reject(&mut self, ids: &[OperationId]) -> Vec<Operation> {
        ids.iter()
            .filter_map(|id| self.entries.remove(id))
            .map(|entry| entry.operation)
            .collect()
    }

    /// Every operation, sorted by `(created_at, id)`.
    pub fn operations(&self) -> Vec<Operation> {
        self.sorted(|_| true)
    }

    /// Every entry, sorted by `(created_at, id)`.
    pub fn entries(&self) -> Vec<StoredOperation> {
        let mut entries: Vec<StoredOperation> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| (e.operation.created_at(), e.id()));
        entries
    }

    /// Status of one operation.
    pub fn status(&self, id: &OperationId) -> Option<Status> {
        self.entries.get(id).map(|entry| entry.status)
    }

    /// Origin of one operation.
    pub fn origin(&self, id: &OperationId) -> Option<Origin> {
        self.entries.get(id).map(|entry| entry.origin)
    }

    /// Check if an operation is recorded.
    pub fn contains(&self, id: &OperationId) -> bool {
        self.entries.contains_key(id)
    }

    /// Ids of every recorded operation.
    pub fn ids(&self) -> BTreeSet<OperationId> {
        self.entries.keys().copied().collect()
    }

    /// Number of entries with the given status.
    pub fn count(&self, status: Status) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }

    /// Number of entries that are not yet `Synced`.
    pub fn pending_count(&self) -> usize {
        self.entries.len() - self.count(Status::Synced)
    }

    /// Largest `created_at` seen in the log.
    pub fn max_created_at(&self) -> Option<u64> {
        self.entries.values().map(|e| e.operation.created_at()).max()
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sorted(&self, keep: impl Fn(&StoredOperation) -> bool) -> Vec<Operation> {
        let mut operations: Vec<Operation> = self
            .entries
            .values()
            .filter(|entry| keep(entry))
            .map(|entry| entry.operation.clone())
            .collect();
        operations.sort_by_key(|op| (op.created_at(), op.id()));
        operations
    }
}
