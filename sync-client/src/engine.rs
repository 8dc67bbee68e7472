//! SyncEngine - owns the operation log and keeps it in sync with the server.
//!
//! # Architecture
//!
//! The engine keeps the canonical [`OperationLog`] (pure bookkeeping from
//! sync-core) and interprets it against two collaborators: a [`Transport`]
//! for the network and an [`OperationStore`] for durability.
//!
//! ```text
//! Repository → push() → OperationLog → OperationStore
//!                            ↓
//!               sync() / poll() → Transport → Server
//!                            ↓
//!               Update::Learned → every Subscription
//! ```
//!
//! Status flow per operation:
//! - local: `PendingSync` → `sync()` → `PendingConfirm` (or `Synced`) → `confirm()` → `Synced`
//! - remote: pulled → `PendingConfirm` → `confirm()` → `Synced` → broadcast
//!
//! Only remote operations are broadcast; the author of a local operation
//! already folded it.
//!
//! # Example
//!
//! ```ignore
//! let engine = SyncEngine::open(author, transport, store, Arc::new(SystemClock), config).await?;
//! let mut updates = engine.subscribe();   // starts the poller
//! engine.push(operation).await?;          // durable locally, pushed in the background
//! while let Ok(update) = updates.recv().await { /* fold */ }
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use sync_core::{
    Backoff, IdIssuer, IssueError, LogError, OperationLog, Origin, Status, StoredOperation,
};
use sync_types::{Operation, OperationId, UserId};
use thiserror::Error;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::store::{OperationStore, StoreError};
use crate::transport::{Transport, TransportError};

/// Engine errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Durable store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Log bookkeeping error.
    #[error("log error: {0}")]
    Log(#[from] LogError),
}

/// Batch broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Operations authored elsewhere, now confirmed and in the log.
    Learned(Vec<Operation>),
    /// Local operations the server refused; they are gone from the log.
    Rejected(Vec<OperationId>),
}

/// Receiver for engine updates.
///
/// The poller runs while at least one subscription is alive; dropping the
/// last one stops it.
pub struct Subscription {
    receiver: broadcast::Receiver<Update>,
    poller: Arc<Poller>,
}

impl Subscription {
    /// Wait for the next update.
    ///
    /// Returns `RecvError::Lagged` if this subscriber fell behind; the
    /// skipped batches are lost and the caller should rebuild from
    /// [`SyncEngine::operations`].
    pub async fn recv(&mut self) -> Result<Update, RecvError> {
        self.receiver.recv().await
    }

    /// Take the next update if one is ready.
    pub fn try_recv(&mut self) -> Result<Update, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.poller.release();
    }
}

/// Subscriber count and the stop signal of the running poller.
#[derive(Debug, Default)]
struct Poller {
    state: StdMutex<PollerState>,
}

#[derive(Debug, Default)]
struct PollerState {
    subscribers: usize,
    stop: Option<watch::Sender<bool>>,
}

impl Poller {
    fn lock(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a new subscriber. Returns the stop signal for a new poller
    /// task when this is the first one.
    fn acquire(&self) -> Option<watch::Receiver<bool>> {
        let mut state = self.lock();
        state.subscribers += 1;
        if state.subscribers > 1 {
            return None;
        }
        let (stop, stopped) = watch::channel(false);
        state.stop = Some(stop);
        Some(stopped)
    }

    fn release(&self) {
        let mut state = self.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            if let Some(stop) = state.stop.take() {
                // The task may have exited already.
                let _ = stop.send(true);
                tracing::info!("Last subscriber gone, stopping poller");
            }
        }
    }
}

#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    scheduled: bool,
}

struct EngineInner<T, S> {
    author: UserId,
    transport: T,
    store: S,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    backoff: Backoff,
    log: Mutex<OperationLog>,
    /// Serializes sync, confirm and poll cycles.
    cycle: Mutex<()>,
    last_stamp: AtomicU64,
    updates: broadcast::Sender<Update>,
    poller: Arc<Poller>,
    retry: StdMutex<RetryState>,
}

impl<T, S> EngineInner<T, S> {
    fn retry_state(&self) -> MutexGuard<'_, RetryState> {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The sync engine of one replica.
///
/// Cheap to clone; clones share the same log, transport and poller.
pub struct SyncEngine<T, S> {
    inner: Arc<EngineInner<T, S>>,
}

impl<T, S> Clone for SyncEngine<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, S> SyncEngine<T, S>
where
    T: Transport + 'static,
    S: OperationStore + 'static,
{
    /// Open the engine for `author`, restoring the log from `store`.
    pub async fn open(
        author: UserId,
        transport: T,
        store: S,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let log = OperationLog::restore(store.load().await?);
        let (updates, _) = broadcast::channel(config.update_buffer.max(1));

        tracing::info!(
            author = %author,
            operations = log.len(),
            pending = log.pending_count(),
            "Sync engine opened"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                author,
                transport,
                store,
                clock,
                backoff: config.retry.backoff(),
                config,
                last_stamp: AtomicU64::new(log.max_created_at().unwrap_or(0)),
                log: Mutex::new(log),
                cycle: Mutex::new(()),
                updates,
                poller: Arc::new(Poller::default()),
                retry: StdMutex::new(RetryState::default()),
            }),
        })
    }

    /// The user this replica authors operations as.
    pub fn author(&self) -> UserId {
        self.inner.author
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Timestamp for a new operation.
    ///
    /// Strictly greater than every timestamp handed out or seen in the log,
    /// so a local write always supersedes what this replica has observed.
    pub fn now(&self) -> u64 {
        let clock = self.inner.clock.now_millis();
        let previous = self
            .inner
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(clock.max(last.saturating_add(1)))
            })
            .unwrap_or_else(|last| last);
        clock.max(previous.saturating_add(1))
    }

    fn observe(&self, created_at: u64) {
        self.inner.last_stamp.fetch_max(created_at, Ordering::SeqCst);
    }

    /// The full log, sorted by `(created_at, id)`.
    pub async fn operations(&self) -> Vec<Operation> {
        self.inner.log.lock().await.operations()
    }

    /// Ids of every operation in the log.
    pub async fn operation_ids(&self) -> BTreeSet<OperationId> {
        self.inner.log.lock().await.ids()
    }

    /// True if the log holds an operation with this id.
    pub async fn contains(&self, id: &OperationId) -> bool {
        self.inner.log.lock().await.contains(id)
    }

    /// Mint an operation id not yet present in the log.
    ///
    /// The log stays locked while `issuer` samples, so candidates are checked
    /// in place without copying the id set.
    pub async fn next_operation_id(
        &self,
        issuer: &mut IdIssuer,
    ) -> Result<OperationId, IssueError> {
        let log = self.inner.log.lock().await;
        issuer.next_id(|id| log.contains(id))
    }

    /// Sync status of one operation.
    pub async fn status(&self, id: &OperationId) -> Option<Status> {
        self.inner.log.lock().await.status(id)
    }

    /// Number of operations not yet `Synced`.
    pub async fn pending_count(&self) -> usize {
        self.inner.log.lock().await.pending_count()
    }

    /// Record a locally authored operation.
    ///
    /// Returns once the operation is durable locally. Network delivery
    /// happens in the background when `push_on_write` is set, otherwise on
    /// the next `sync()` or poll tick.
    pub async fn push(&self, operation: Operation) -> Result<(), SyncError> {
        let id = operation.id();
        let kind = operation.payload().kind();
        self.observe(operation.created_at());

        {
            let mut log = self.inner.log.lock().await;
            let entry = log.record_local(operation)?;
            if let Err(e) = self.inner.store.save(std::slice::from_ref(&entry)).await {
                log.unrecord(&id);
                tracing::error!(operation = %id, kind, "Failed to persist operation: {}", e);
                return Err(e.into());
            }
        }
        tracing::debug!(operation = %id, kind, "Recorded local operation");

        // A new write re-arms automatic retry.
        self.inner.retry_state().attempt = 0;

        if self.inner.config.push_on_write {
            self.spawn_sync();
        }
        Ok(())
    }

    /// Push every `PendingSync` operation in one batch, then confirm.
    ///
    /// Returns the number of operations pushed.
    pub async fn sync(&self) -> Result<usize, SyncError> {
        let _cycle = self.inner.cycle.lock().await;
        self.sync_locked().await
    }

    /// Confirm every `PendingConfirm` operation.
    ///
    /// Returns the number of operations confirmed.
    pub async fn confirm(&self) -> Result<usize, SyncError> {
        let _cycle = self.inner.cycle.lock().await;
        self.confirm_locked().await
    }

    /// One poll tick: push what is pending, pull, store, confirm.
    ///
    /// Returns the number of new operations pulled.
    pub async fn poll(&self) -> Result<usize, SyncError> {
        self.poll_cycle(None).await
    }

    /// Subscribe to updates. The first subscriber starts the poller.
    ///
    /// Must be called within a tokio runtime.
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.inner.updates.subscribe();
        if let Some(stop) = self.inner.poller.acquire() {
            tracing::info!(
                interval_ms = self.inner.config.poll_interval_ms,
                "First subscriber, starting poller"
            );
            self.spawn_poller(stop);
        }
        Subscription {
            receiver,
            poller: Arc::clone(&self.inner.poller),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.poller.lock().subscribers
    }

    /// Whether the poller is running.
    pub fn is_polling(&self) -> bool {
        self.inner.poller.lock().stop.is_some()
    }

    async fn sync_locked(&self) -> Result<usize, SyncError> {
        let batch = self.inner.log.lock().await.pending_sync();
        if batch.is_empty() {
            return Ok(0);
        }
        let ids: Vec<OperationId> = batch.iter().map(Operation::id).collect();

        let unconfirmed = match self.inner.transport.push_operations(&batch).await {
            Ok(unconfirmed) => unconfirmed,
            Err(TransportError::Conflict { operation_ids }) => {
                let refused: Vec<OperationId> = operation_ids
                    .iter()
                    .filter(|id| ids.contains(id))
                    .copied()
                    .collect();
                self.reject(&refused).await?;
                if refused.len() < ids.len() {
                    self.schedule_retry();
                }
                return Err(TransportError::Conflict { operation_ids }.into());
            }
            Err(e) => {
                tracing::warn!(pending = ids.len(), "Push failed: {}", e);
                if e.is_transient() {
                    self.schedule_retry();
                }
                return Err(e.into());
            }
        };

        let pushed: BTreeSet<OperationId> = ids.iter().copied().collect();
        let unconfirmed_ids: BTreeSet<OperationId> =
            unconfirmed.iter().map(Operation::id).collect();
        let foreign: Vec<Operation> = unconfirmed
            .into_iter()
            .filter(|op| !pushed.contains(&op.id()))
            .collect();
        for op in &foreign {
            self.observe(op.created_at());
        }

        let changed = {
            let mut log = self.inner.log.lock().await;
            let mut changed = log.mark_pushed(&ids, &unconfirmed_ids);
            changed.extend(log.record_remote(foreign));
            changed
        };
        self.persist(&changed).await?;
        self.inner.retry_state().attempt = 0;

        tracing::info!(
            pushed = ids.len(),
            awaiting_confirm = unconfirmed_ids.len(),
            "Pushed operations"
        );

        // Confirm failures are retried on the next cycle.
        if let Err(e) = self.confirm_locked().await {
            tracing::debug!("Confirm after push deferred: {}", e);
        }
        Ok(ids.len())
    }

    async fn confirm_locked(&self) -> Result<usize, SyncError> {
        let ids = self.inner.log.lock().await.pending_confirm_ids();
        if ids.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.inner.transport.confirm_operations(&ids).await {
            tracing::warn!(pending = ids.len(), "Confirm failed: {}", e);
            return Err(e.into());
        }

        let changed = self.inner.log.lock().await.mark_synced(&ids);
        let persisted = self.persist(&changed).await;

        let learned: Vec<Operation> = changed
            .into_iter()
            .filter(|entry| entry.origin == Origin::Remote)
            .map(|entry| entry.operation)
            .collect();
        tracing::debug!(confirmed = ids.len(), learned = learned.len(), "Confirmed operations");
        if !learned.is_empty() {
            tracing::info!(count = learned.len(), "Learned operations from other replicas");
            // No subscribers is fine: repositories fold the log when they open.
            let _ = self.inner.updates.send(Update::Learned(learned));
        }

        persisted?;
        Ok(ids.len())
    }

    async fn poll_cycle(&self, stop: Option<&watch::Receiver<bool>>) -> Result<usize, SyncError> {
        let _cycle = self.inner.cycle.lock().await;

        let has_pending = self.inner.log.lock().await.count(Status::PendingSync) > 0;
        if has_pending {
            if let Err(e) = self.sync_locked().await {
                tracing::debug!("Push during poll failed: {}", e);
            }
        }

        if stop.is_some_and(|stop| *stop.borrow()) {
            return Ok(0);
        }

        let pulled = match self.inner.transport.pull_operations().await {
            Ok(pulled) => pulled,
            Err(e) => {
                tracing::warn!("Pull failed: {}", e);
                return Err(e.into());
            }
        };
        for op in &pulled {
            self.observe(op.created_at());
        }

        let recorded = self.inner.log.lock().await.record_remote(pulled);
        if !recorded.is_empty() {
            tracing::debug!(count = recorded.len(), "Pulled new operations");
        }
        self.persist(&recorded).await?;
        self.confirm_locked().await?;
        Ok(recorded.len())
    }

    async fn reject(&self, ids: &[OperationId]) -> Result<(), SyncError> {
        if ids.is_empty() {
            return Ok(());
        }

        let rejected = self.inner.log.lock().await.reject(ids);
        for op in &rejected {
            tracing::warn!(
                operation = %op.id(),
                kind = op.payload().kind(),
                "Server rejected operation, dropping it"
            );
        }

        let removed = self.inner.store.remove(ids).await;
        let _ = self.inner.updates.send(Update::Rejected(ids.to_vec()));
        removed.map_err(|e| {
            tracing::error!(count = ids.len(), "Failed to remove rejected operations: {}", e);
            SyncError::from(e)
        })
    }

    async fn persist(&self, entries: &[StoredOperation]) -> Result<(), SyncError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.inner.store.save(entries).await.map_err(|e| {
            tracing::error!(count = entries.len(), "Failed to persist log entries: {}", e);
            SyncError::from(e)
        })
    }

    fn spawn_sync(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.sync().await {
                tracing::debug!("Background push failed: {}", e);
            }
        });
    }

    fn schedule_retry(&self) {
        let retry = &self.inner.config.retry;
        if !retry.enabled {
            return;
        }

        let attempt = {
            let mut state = self.inner.retry_state();
            if state.scheduled {
                return;
            }
            if state.attempt >= retry.max_attempts {
                tracing::warn!(
                    attempts = state.attempt,
                    "Giving up on automatic push retry until the next write or poll"
                );
                return;
            }
            state.attempt += 1;
            state.scheduled = true;
            state.attempt
        };

        let delay = self.inner.backoff.delay(attempt);
        tracing::debug!(attempt, delay = ?delay, "Scheduling push retry");

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.inner.retry_state().scheduled = false;
            if let Err(e) = engine.sync().await {
                tracing::debug!(attempt, "Push retry failed: {}", e);
            }
        });
    }

    fn spawn_poller(&self, mut stop: watch::Receiver<bool>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let period = engine.inner.config.poll_interval();
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = timer.tick() => {
                        if let Err(e) = engine.poll_cycle(Some(&stop)).await {
                            tracing::debug!("Poll failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Poller stopped");
        });
    }
}
