//! Durable storage for the operation log.
//!
//! The engine keeps its log in memory and writes every status change through
//! an [`OperationStore`]. Entries are keyed by operation id with upsert
//! semantics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sync_core::StoredOperation;
use sync_types::OperationId;
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding the log snapshot failed.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The backing file is not a valid log snapshot.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The store refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for operation log storage backends.
#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Load every stored entry.
    async fn load(&self) -> Result<Vec<StoredOperation>, StoreError>;

    /// Insert or replace entries by operation id.
    async fn save(&self, entries: &[StoredOperation]) -> Result<(), StoreError>;

    /// Delete entries by operation id. Unknown ids are ignored.
    async fn remove(&self, ids: &[OperationId]) -> Result<(), StoreError>;
}

/// In-memory store. Clones share the same entries.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    entries: BTreeMap<OperationId, StoredOperation>,
    fail_next_save: Option<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the stored entries, keyed by id.
    pub fn entries(&self) -> BTreeMap<OperationId, StoredOperation> {
        self.lock().entries.clone()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Cause the next save to fail with the given reason.
    pub fn fail_next_save(&self, reason: &str) {
        self.lock().fail_next_save = Some(reason.to_string());
    }
}

#[async_trait]
impl OperationStore for MemoryStore {
    async fn load(&self) -> Result<Vec<StoredOperation>, StoreError> {
        Ok(self.lock().entries.values().cloned().collect())
    }

    async fn save(&self, entries: &[StoredOperation]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(reason) = inner.fail_next_save.take() {
            return Err(StoreError::Unavailable(reason));
        }
        for entry in entries {
            inner.entries.insert(entry.id(), entry.clone());
        }
        Ok(())
    }

    async fn remove(&self, ids: &[OperationId]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for id in ids {
            inner.entries.remove(id);
        }
        Ok(())
    }
}

/// Single-file store holding a MessagePack snapshot of the whole log.
///
/// Every write rewrites the snapshot into a sibling temporary file and
/// renames it over the original, so a crash leaves either the old or the new
/// snapshot on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Use the snapshot at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_snapshot(&self) -> Result<BTreeMap<OperationId, StoredOperation>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let entries: Vec<StoredOperation> = rmp_serde::from_slice(&bytes)?;
        Ok(entries.into_iter().map(|e| (e.id(), e)).collect())
    }

    async fn write_snapshot(
        &self,
        entries: &BTreeMap<OperationId, StoredOperation>,
    ) -> Result<(), StoreError> {
        let snapshot: Vec<&StoredOperation> = entries.values().collect();
        let bytes = rmp_serde::to_vec_named(&snapshot)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl OperationStore for FileStore {
    async fn load(&self) -> Result<Vec<StoredOperation>, StoreError> {
        Ok(self.read_snapshot().await?.into_values().collect())
    }

    async fn save(&self, entries: &[StoredOperation]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.read_snapshot().await?;
        for entry in entries {
            snapshot.insert(entry.id(), entry.clone());
        }
        self.write_snapshot(&snapshot).await
    }

    async fn remove(&self, ids: &[OperationId]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.read_snapshot().await?;
        for id in ids {
            snapshot.remove(id);
        }
        self.write_snapshot(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::{Origin, Status};
    use sync_types::{Operation, Payload, UserId, ID_LEN};

    fn entry(n: u8, status: Status) -> StoredOperation {
        StoredOperation {
            operation: Operation::new(
                OperationId::from_array([n; ID_LEN]),
                u64::from(n),
                UserId::from_array([1; ID_LEN]),
                Payload::UpdateDisplayName {
                    user_id: UserId::from_array([1; ID_LEN]),
                    display_name: format!("name {}", n),
                },
            ),
            status,
            origin: Origin::Local,
        }
    }

    // ===========================================
    // MemoryStore Tests
    // ===========================================

    #[tokio::test]
    async fn memory_store_upserts_by_id() {
        let store = MemoryStore::new();
        store.save(&[entry(1, Status::PendingSync)]).await.unwrap();
        store.save(&[entry(1, Status::Synced), entry(2, Status::PendingSync)]).await.unwrap();

        let entries = store.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[&OperationId::from_array([1; ID_LEN])].status,
            Status::Synced
        );
    }

    #[tokio::test]
    async fn memory_store_forced_failure_writes_nothing() {
        let store = MemoryStore::new();
        store.fail_next_save("disk full");

        let result = store.save(&[entry(1, Status::PendingSync)]).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.is_empty());

        store.save(&[entry(1, Status::PendingSync)]).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_removes() {
        let store = MemoryStore::new();
        store.save(&[entry(1, Status::PendingSync), entry(2, Status::PendingSync)]).await.unwrap();
        store
            .remove(&[OperationId::from_array([1; ID_LEN]), OperationId::from_array([9; ID_LEN])])
            .await
            .unwrap();
        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    // ===========================================
    // FileStore Tests
    // ===========================================

    #[tokio::test]
    async fn file_store_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("log.msgpack"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.msgpack");

        let store = FileStore::new(&path);
        store.save(&[entry(1, Status::PendingSync), entry(2, Status::Synced)]).await.unwrap();
        store.save(&[entry(1, Status::PendingConfirm)]).await.unwrap();
        store.remove(&[OperationId::from_array([2; ID_LEN])]).await.unwrap();
        drop(store);

        let reopened = FileStore::new(&path);
        let entries = reopened.load().await.unwrap();
        assert_eq!(entries, vec![entry(1, Status::PendingConfirm)]);
        assert!(!path.with_extension("msgpack.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.msgpack");
        std::fs::write(&path, b"\xc1 definitely not msgpack").unwrap();

        let result = FileStore::new(&path).load().await;
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }
}
