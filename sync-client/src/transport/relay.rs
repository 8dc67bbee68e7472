//! In-process relay shared by several replicas.
//!
//! `MemoryRelay` plays the server: it accepts pushed operations, refuses
//! operations that mint an entity id another operation already minted, and
//! hands each connected replica the operations pushed by the others until that
//! replica confirms them. Used by integration tests to run several engines
//! against one server without a network.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sync_types::{EntityRef, Operation, OperationId};

use super::{Transport, TransportError};

/// Shared in-memory server.
#[derive(Debug, Default, Clone)]
pub struct MemoryRelay {
    inner: Arc<Mutex<RelayInner>>,
}

#[derive(Debug, Default)]
struct RelayInner {
    /// Accepted operations in arrival order.
    log: Vec<Operation>,
    /// Replica that pushed each accepted operation.
    pushed_by: BTreeMap<OperationId, usize>,
    /// Operation that minted each entity.
    minted: BTreeMap<EntityRef, OperationId>,
    /// Per replica: operations it has confirmed.
    confirmed: BTreeMap<usize, BTreeSet<OperationId>>,
    next_client: usize,
    offline: bool,
}

impl MemoryRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a replica and return its transport.
    pub fn connect(&self) -> RelayTransport {
        let mut inner = self.lock();
        let client = inner.next_client;
        inner.next_client += 1;
        inner.confirmed.insert(client, BTreeSet::new());
        RelayTransport {
            relay: self.clone(),
            client,
        }
    }

    /// Simulate losing (or regaining) connectivity for every replica.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Every accepted operation, in arrival order.
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().log.clone()
    }

    /// Number of accepted operations.
    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    /// Check if nothing was accepted yet.
    pub fn is_empty(&self) -> bool {
        self.lock().log.is_empty()
    }
}

impl RelayInner {
    fn push(&mut self, client: usize, batch: &[Operation]) -> Result<Vec<Operation>, TransportError> {
        // Refuse the whole batch if any create reuses an id minted by a
        // different operation.
        let conflicts: Vec<OperationId> = batch
            .iter()
            .filter(|op| {
                op.payload()
                    .created_entity()
                    .and_then(|entity| self.minted.get(&entity))
                    .is_some_and(|minter| *minter != op.id())
            })
            .map(Operation::id)
            .collect();
        if !conflicts.is_empty() {
            return Err(TransportError::Conflict {
                operation_ids: conflicts,
            });
        }

        let mut unconfirmed = Vec::new();
        for op in batch {
            if self.pushed_by.contains_key(&op.id()) {
                // Already accepted on an earlier push; nothing left to confirm.
                continue;
            }
            if let Some(entity) = op.payload().created_entity() {
                self.minted.insert(entity, op.id());
            }
            self.pushed_by.insert(op.id(), client);
            self.log.push(op.clone());
            unconfirmed.push(op.clone());
        }
        Ok(unconfirmed)
    }

    fn pull(&self, client: usize) -> Vec<Operation> {
        let confirmed = self.confirmed.get(&client);
        self.log
            .iter()
            .filter(|op| self.pushed_by.get(&op.id()) != Some(&client))
            .filter(|op| !confirmed.is_some_and(|ids| ids.contains(&op.id())))
            .cloned()
            .collect()
    }
}

/// Transport of one replica connected to a [`MemoryRelay`].
#[derive(Debug, Clone)]
pub struct RelayTransport {
    relay: MemoryRelay,
    client: usize,
}

impl RelayTransport {
    fn online(&self) -> Result<MutexGuard<'_, RelayInner>, TransportError> {
        let inner = self.relay.lock();
        if inner.offline {
            return Err(TransportError::NoConnection);
        }
        Ok(inner)
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn push_operations(&self, batch: &[Operation]) -> Result<Vec<Operation>, TransportError> {
        self.online()?.push(self.client, batch)
    }

    async fn confirm_operations(&self, ids: &[OperationId]) -> Result<(), TransportError> {
        self.online()?
            .confirmed
            .entry(self.client)
            .or_default()
            .extend(ids.iter().copied());
        Ok(())
    }

    async fn pull_operations(&self) -> Result<Vec<Operation>, TransportError> {
        Ok(self.online()?.pull(self.client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{Payload, UserId, ID_LEN};

    fn create_user(n: u8, user: u8) -> Operation {
        Operation::new(
            OperationId::from_array([n; ID_LEN]),
            u64::from(n),
            UserId::from_array([user; ID_LEN]),
            Payload::CreateUser {
                user_id: UserId::from_array([user; ID_LEN]),
                display_name: "someone".into(),
            },
        )
    }

    #[tokio::test]
    async fn pushed_operations_reach_other_replicas_only() {
        let relay = MemoryRelay::new();
        let a = relay.connect();
        let b = relay.connect();

        let unconfirmed = a.push_operations(&[create_user(1, 1)]).await.unwrap();
        assert_eq!(unconfirmed.len(), 1);

        assert!(a.pull_operations().await.unwrap().is_empty());
        assert_eq!(b.pull_operations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn confirmed_operations_are_not_pulled_again() {
        let relay = MemoryRelay::new();
        let a = relay.connect();
        let b = relay.connect();
        a.push_operations(&[create_user(1, 1)]).await.unwrap();

        let pulled = b.pull_operations().await.unwrap();
        let ids: Vec<_> = pulled.iter().map(Operation::id).collect();
        b.confirm_operations(&ids).await.unwrap();

        assert!(b.pull_operations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repushing_is_acknowledged_outright() {
        let relay = MemoryRelay::new();
        let a = relay.connect();
        a.push_operations(&[create_user(1, 1)]).await.unwrap();

        let unconfirmed = a.push_operations(&[create_user(1, 1)]).await.unwrap();
        assert!(unconfirmed.is_empty());
        assert_eq!(relay.len(), 1);
    }

    #[tokio::test]
    async fn colliding_create_is_refused() {
        let relay = MemoryRelay::new();
        let a = relay.connect();
        let b = relay.connect();
        a.push_operations(&[create_user(1, 7)]).await.unwrap();

        // Same user id minted by a different operation
        let result = b.push_operations(&[create_user(2, 7), create_user(3, 8)]).await;
        assert_eq!(
            result,
            Err(TransportError::Conflict {
                operation_ids: vec![OperationId::from_array([2; ID_LEN])]
            })
        );
        assert_eq!(relay.len(), 1);
    }

    #[tokio::test]
    async fn offline_relay_refuses_everything() {
        let relay = MemoryRelay::new();
        let a = relay.connect();
        relay.set_offline(true);

        assert_eq!(
            a.push_operations(&[create_user(1, 1)]).await,
            Err(TransportError::NoConnection)
        );
        assert_eq!(a.pull_operations().await, Err(TransportError::NoConnection));

        relay.set_offline(false);
        assert!(a.push_operations(&[create_user(1, 1)]).await.is_ok());
    }
}
