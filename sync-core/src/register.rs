//! Last-writer-wins entity register.
//!
//! A [`Register`] holds the current value of one entity (or one field of an
//! entity) derived from every write seen so far. Deletes are writes of a
//! tombstone under the same rule, so folding is commutative and idempotent:
//!
//! - write vs write: greater `(created_at, author)` wins, operation id
//!   breaks same-author ties
//! - delete vs write: the tombstone wins when its timestamp is >= the write's
//! - re-applying the winning write changes nothing
//! - a deleted register only comes back through a later-timestamped write

use sync_types::{OperationId, Stamp, UserId};

/// Version of the write currently held by a register.
///
/// Field order is the comparison order. `tombstone` sits right after the
/// timestamp so a delete beats any write with an equal timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    created_at: u64,
    tombstone: bool,
    author: UserId,
    operation: OperationId,
}

impl Version {
    fn write(stamp: Stamp) -> Self {
        Self {
            created_at: stamp.created_at,
            tombstone: false,
            author: stamp.author,
            operation: stamp.operation,
        }
    }

    fn tombstone(stamp: Stamp) -> Self {
        Self {
            tombstone: true,
            ..Self::write(stamp)
        }
    }

    /// Timestamp of the winning write.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Whether the winning write was a delete.
    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Operation that carried the winning write.
    pub fn operation(&self) -> OperationId {
        self.operation
    }
}

/// LWW cell for one entity or field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register<V> {
    value: Option<V>,
    version: Option<Version>,
}

impl<V> Default for Register<V> {
    fn default() -> Self {
        Self {
            value: None,
            version: None,
        }
    }
}

impl<V> Register<V> {
    /// Create a register that has seen no writes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` at `stamp`. Returns true if the write won.
    pub fn write(&mut self, stamp: Stamp, value: V) -> bool {
        self.apply(Version::write(stamp), Some(value))
    }

    /// Write a tombstone at `stamp`. Returns true if the delete won.
    pub fn delete(&mut self, stamp: Stamp) -> bool {
        self.apply(Version::tombstone(stamp), None)
    }

    fn apply(&mut self, version: Version, value: Option<V>) -> bool {
        if self.version.is_some_and(|current| current >= version) {
            return false;
        }
        self.version = Some(version);
        self.value = value;
        true
    }

    /// Current value; `None` if never written or deleted.
    pub fn get(&self) -> Option<&V> {
        self.value.as_ref()
    }

    /// True if the winning write is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.version.is_some_and(|v| v.tombstone)
    }

    /// True if any write or delete has been seen.
    pub fn is_known(&self) -> bool {
        self.version.is_some()
    }

    /// Version of the winning write.
    pub fn version(&self) -> Option<Version> {
        self.version
    }
}
