use async_trait::async_trait;

use crate::snapshot::{SnapList, Snapshot};
use super::traits::{SnapStore, SnapshotReader, StorageError};

/// Store that fails every operation. Backs the `FAILED` provider used to
/// exercise failure handling end to end.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailedSnapStore;

impl FailedSnapStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn failure(operation: &str) -> StorageError {
    StorageError::Backend(format!("failed to {operation} snapshot"))
}

#[async_trait]
impl SnapStore for FailedSnapStore {
    async fn save(&self, _snap: &Snapshot, _content: SnapshotReader) -> Result<(), StorageError> {
        Err(failure("save"))
    }

    async fn fetch(&self, _snap: &Snapshot) -> Result<SnapshotReader, StorageError> {
        Err(failure("fetch"))
    }

    async fn list(&self, _include_all: bool) -> Result<SnapList, StorageError> {
        Err(failure("list"))
    }

    async fn delete(&self, _snap: &Snapshot) -> Result<(), StorageError> {
        Err(failure("delete"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotKind;

    #[tokio::test]
    async fn test_every_operation_fails() {
        let store = FailedSnapStore::new();
        let snap = Snapshot::with_created_on(SnapshotKind::Full, 0, 1, 1);

        assert!(store.save(&snap, Box::new(&b"x"[..])).await.is_err());
        assert!(store.fetch(&snap).await.is_err());
        assert!(store.list(true).await.is_err());
        assert!(store.delete(&snap).await.is_err());
        assert!(store.probe().await.is_err());
    }
}
