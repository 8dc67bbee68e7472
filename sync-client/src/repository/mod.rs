//! Domain repositories.
//!
//! A repository is a query + mutate facade over one domain's state. The state
//! is never persisted: it is folded from the engine's log when the repository
//! opens and kept current from then on by
//!
//! - folding each of its own writes right after a successful `push()`
//! - folding batches the engine learned from other replicas
//! - refolding the whole log when the engine rejected operations or this
//!   repository lagged behind the update stream
//!
//! Every fold is diffed against the previous view and published as one
//! change event per changed aggregate on [`changes()`](UsersRepository::changes).

mod images;
mod spendings;
mod users;

pub use images::{ImagesError, ImagesRepository};
pub use spendings::{SpendingsError, SpendingsRepository};
pub use users::{UsersError, UsersRepository};

use std::sync::{Arc, PoisonError, RwLock};

use sync_core::{IdIssuer, IssueError, Reducer};
use sync_types::{Operation, Payload, UserId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::engine::{Subscription, SyncEngine, Update};
use crate::store::OperationStore;
use crate::transport::Transport;

/// State shared between a replica and its listener task.
struct Shared<D: Reducer> {
    domain: &'static str,
    /// User the views are rendered for.
    viewer: UserId,
    state: RwLock<D>,
    changes: broadcast::Sender<D::Change>,
    /// Single writer: local mutations and full rebuilds hold this.
    writer: Mutex<IdIssuer>,
}

impl<D: Reducer> Shared<D> {
    fn read<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn update(&self, f: impl FnOnce(&mut D)) {
        let changes = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let before = state.view(&self.viewer);
            f(&mut *state);
            D::diff(&before, &state.view(&self.viewer))
        };
        for change in changes {
            // Nobody listening is fine.
            let _ = self.changes.send(change);
        }
    }

    async fn rebuild<T, S>(&self, engine: &SyncEngine<T, S>)
    where
        T: Transport + 'static,
        S: OperationStore + 'static,
    {
        let _writer = self.writer.lock().await;
        let fresh = D::fold(&engine.operations().await);
        self.update(|state| *state = fresh);
    }
}

/// One domain's folded state, kept current against a [`SyncEngine`].
pub(crate) struct Replica<D: Reducer> {
    shared: Arc<Shared<D>>,
    listener: JoinHandle<()>,
}

impl<D: Reducer> Replica<D> {
    pub(crate) async fn open<T, S>(engine: &SyncEngine<T, S>, domain: &'static str) -> Self
    where
        T: Transport + 'static,
        S: OperationStore + 'static,
    {
        // Subscribe before folding: a batch learned in between is folded
        // twice, which is harmless.
        let subscription = engine.subscribe();
        let operations = engine.operations().await;
        let (changes, _) = broadcast::channel(engine.config().update_buffer.max(1));

        let shared = Arc::new(Shared {
            domain,
            viewer: engine.author(),
            state: RwLock::new(D::fold(&operations)),
            changes,
            writer: Mutex::new(
                IdIssuer::new().with_max_attempts(engine.config().max_id_attempts),
            ),
        });
        tracing::debug!(domain, operations = operations.len(), "Repository opened");

        let listener = tokio::spawn(listen(engine.clone(), subscription, Arc::clone(&shared)));
        Self { shared, listener }
    }

    /// Query a consistent snapshot of the state.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        self.shared.read(f)
    }

    /// Take the single-writer lock.
    pub(crate) async fn writer(&self) -> MutexGuard<'_, IdIssuer> {
        self.shared.writer.lock().await
    }

    /// Fold an operation this repository just pushed.
    pub(crate) fn fold_local(&self, operation: &Operation) {
        self.shared.update(|state| state.apply(operation));
    }

    pub(crate) fn changes(&self) -> broadcast::Receiver<D::Change> {
        self.shared.changes.subscribe()
    }
}

impl<D: Reducer> Drop for Replica<D> {
    fn drop(&mut self) {
        // Dropping the task drops its subscription, which may stop the poller.
        self.listener.abort();
    }
}

async fn listen<D, T, S>(engine: SyncEngine<T, S>, mut subscription: Subscription, shared: Arc<Shared<D>>)
where
    D: Reducer,
    T: Transport + 'static,
    S: OperationStore + 'static,
{
    loop {
        match subscription.recv().await {
            Ok(Update::Learned(operations)) => {
                shared.update(|state| {
                    for operation in &operations {
                        state.apply(operation);
                    }
                });
            }
            Ok(Update::Rejected(ids)) => {
                tracing::info!(
                    domain = shared.domain,
                    rejected = ids.len(),
                    "Rebuilding after rejected operations"
                );
                shared.rebuild(&engine).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(domain = shared.domain, skipped, "Update stream lagged, rebuilding");
                shared.rebuild(&engine).await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Build an operation authored by the engine's user at the engine's clock.
pub(crate) async fn author_operation<T, S>(
    engine: &SyncEngine<T, S>,
    issuer: &mut IdIssuer,
    payload: Payload,
) -> Result<Operation, IssueError>
where
    T: Transport + 'static,
    S: OperationStore + 'static,
{
    let id = engine.next_operation_id(issuer).await?;
    Ok(Operation::new(id, engine.now(), engine.author(), payload))
}
