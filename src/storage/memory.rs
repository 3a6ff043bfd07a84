use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::AsyncReadExt;

use crate::snapshot::{SnapList, Snapshot};
use super::traits::{SnapStore, SnapshotReader, StorageError};

/// In-process snapshot store.
///
/// Keys are the store-relative snapshot paths. Chunk segments are never
/// produced here, so `list(true)` and `list(false)` return the same set.
pub struct MemorySnapStore {
    prefix: String,
    data: DashMap<String, (Snapshot, Bytes)>,
}

impl MemorySnapStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(crate::config::DEFAULT_PREFIX)
    }

    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            data: DashMap::new(),
        }
    }

    /// Get current snapshot count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Stored bytes for a snapshot, if present.
    #[must_use]
    pub fn content(&self, snap: &Snapshot) -> Option<Bytes> {
        self.data.get(&snap.relative_path()).map(|r| r.value().1.clone())
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for MemorySnapStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapStore for MemorySnapStore {
    async fn save(&self, snap: &Snapshot, mut content: SnapshotReader) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).await?;

        let mut stored = snap.clone();
        stored.prefix = self.prefix.clone();
        self.data.insert(snap.relative_path(), (stored, Bytes::from(buf)));
        Ok(())
    }

    async fn fetch(&self, snap: &Snapshot) -> Result<SnapshotReader, StorageError> {
        let bytes = self
            .content(snap)
            .ok_or_else(|| StorageError::NotFound(snap.relative_path()))?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    async fn list(&self, include_all: bool) -> Result<SnapList, StorageError> {
        Ok(self
            .data
            .iter()
            .map(|r| r.value().0.clone())
            .filter(|s| include_all || !s.is_chunk)
            .collect())
    }

    async fn delete(&self, snap: &Snapshot) -> Result<(), StorageError> {
        self.data
            .remove(&snap.relative_path())
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(snap.relative_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotKind;

    fn snap(last: u64) -> Snapshot {
        Snapshot::with_created_on(SnapshotKind::Full, 0, last, 1_700_000_000 + last as i64)
    }

    fn reader(data: &'static [u8]) -> SnapshotReader {
        Box::new(data)
    }

    async fn read_all(mut r: SnapshotReader) -> Vec<u8> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = MemorySnapStore::new();
        assert!(store.is_empty());
        assert!(store.list(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_fetch() {
        let store = MemorySnapStore::new();
        let s = snap(10);

        store.save(&s, reader(b"etcd-data")).await.unwrap();

        assert_eq!(read_all(store.fetch(&s).await.unwrap()).await, b"etcd-data");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_nonexistent_is_not_found() {
        let store = MemorySnapStore::new();
        let result = store.fetch(&snap(1)).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_sorted_and_prefixed() {
        let store = MemorySnapStore::with_prefix("v2/cluster-a");
        for last in [30, 10, 20] {
            store.save(&snap(last), reader(b"x")).await.unwrap();
        }

        let list = store.list(false).await.unwrap();
        let revisions: Vec<u64> = list.iter().map(|s| s.last_revision).collect();
        assert_eq!(revisions, vec![10, 20, 30]);
        assert!(list.iter().all(|s| s.prefix == "v2/cluster-a"));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = MemorySnapStore::new();
        let s = snap(5);

        store.save(&s, reader(b"v1")).await.unwrap();
        store.save(&s, reader(b"v2")).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.content(&s).unwrap().as_ref(), b"v2");
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemorySnapStore::new();
        let s = snap(7);
        store.save(&s, reader(b"x")).await.unwrap();

        store.delete(&s).await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.delete(&s).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_saves() {
        use std::sync::Arc;

        let store = Arc::new(MemorySnapStore::new());
        let mut handles = vec![];

        for batch in 0..10u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10u64 {
                    store.save(&snap(batch * 10 + i), reader(b"x")).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
