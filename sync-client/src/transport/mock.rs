//! Mock transport for testing.
//!
//! Allows scripting server responses and capturing every call for
//! verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_types::{Operation, OperationId};

/// Mock transport for testing.
///
/// By default a push succeeds and echoes the whole batch back as
/// unconfirmed, confirms succeed, and pulls return nothing.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    pushed: Vec<Vec<Operation>>,
    confirmed: Vec<Vec<OperationId>>,
    pull_count: usize,
    push_responses: VecDeque<Vec<Operation>>,
    pull_queue: VecDeque<Vec<Operation>>,
    fail_next_push: Option<TransportError>,
    fail_next_confirm: Option<TransportError>,
    fail_next_pull: Option<TransportError>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the unconfirmed batch returned by the next `push_operations()`.
    pub fn queue_push_response(&self, unconfirmed: Vec<Operation>) {
        self.lock().push_responses.push_back(unconfirmed);
    }

    /// Queue a batch to be returned by the next `pull_operations()`.
    pub fn queue_pull(&self, operations: Vec<Operation>) {
        self.lock().pull_queue.push_back(operations);
    }

    /// Every batch that was pushed.
    pub fn pushed_batches(&self) -> Vec<Vec<Operation>> {
        self.lock().pushed.clone()
    }

    /// Every batch of ids that was confirmed.
    pub fn confirmed_batches(&self) -> Vec<Vec<OperationId>> {
        self.lock().confirmed.clone()
    }

    /// Number of `pull_operations()` calls so far.
    pub fn pull_count(&self) -> usize {
        self.lock().pull_count
    }

    /// Cause the next push to fail with the given error.
    pub fn fail_next_push(&self, error: TransportError) {
        self.lock().fail_next_push = Some(error);
    }

    /// Cause the next confirm to fail with the given error.
    pub fn fail_next_confirm(&self, error: TransportError) {
        self.lock().fail_next_confirm = Some(error);
    }

    /// Cause the next pull to fail with the given error.
    pub fn fail_next_pull(&self, error: TransportError) {
        self.lock().fail_next_pull = Some(error);
    }

    /// Clear all state (captures, scripts, forced failures).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn push_operations(&self, batch: &[Operation]) -> Result<Vec<Operation>, TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_push.take() {
            return Err(error);
        }

        inner.pushed.push(batch.to_vec());
        Ok(inner
            .push_responses
            .pop_front()
            .unwrap_or_else(|| batch.to_vec()))
    }

    async fn confirm_operations(&self, ids: &[OperationId]) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if let Some(error) = inner.fail_next_confirm.take() {
            return Err(error);
        }

        inner.confirmed.push(ids.to_vec());
        Ok(())
    }

    async fn pull_operations(&self) -> Result<Vec<Operation>, TransportError> {
        let mut inner = self.lock();
        inner.pull_count += 1;

        if let Some(error) = inner.fail_next_pull.take() {
            return Err(error);
        }

        Ok(inner.pull_queue.pop_front().unwrap_or_default())
    }
}
