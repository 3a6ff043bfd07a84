// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot store on top of an [`opendal::Operator`].
//!
//! Two object layouts are used:
//!
//! - **Direct** (local filesystem): the snapshot is one object at its path.
//! - **Segmented** (object services): the snapshot is staged in the temp
//!   directory, uploaded as fixed-size segment objects through the chunk
//!   pipeline, and indexed by a JSON manifest written at the snapshot path.
//!
//! ```text
//! <prefix>/Full-00000000-00001000-1700000000              manifest
//! <prefix>/Full-00000000-00001000-1700000000/0000000001   segment
//! <prefix>/Full-00000000-00001000-1700000000/0000000002   segment
//! ```
//!
//! The operator is rooted at the container and every key carries the store
//! prefix, so snapshots from the legacy `v1` layout stay addressable from a
//! store configured for `v2` (see [`Snapshot::storage_prefix`]).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use opendal::{services, EntryMode, ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::{Credentials, Provider, StoreConfig};
use crate::resilience::retry::{retry, RetryConfig};
use crate::snapshot::{SnapList, Snapshot};
use crate::upload::{plan_chunks, ChunkUploadConfig, ChunkUploader};
use super::traits::{SnapStore, SnapshotReader, StorageError};

const TEMP_FILE_PREFIX: &str = "etcd-backup-";
const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Direct,
    Segmented,
}

/// Index object written at the snapshot path of a segmented snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub snapshot: String,
    pub size: u64,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: usize,
    pub offset: u64,
    pub size: u64,
}

/// Key of segment `id` below the snapshot at `path`.
#[must_use]
pub fn segment_key(path: &str, id: usize) -> String {
    format!("{path}/{id:010}")
}

pub struct ObjectSnapStore {
    op: Operator,
    layout: Layout,
    prefix: String,
    temp_dir: PathBuf,
    chunks: ChunkUploadConfig,
    retry: RetryConfig,
}

impl ObjectSnapStore {
    /// Wrap an existing operator.
    pub fn new(op: Operator, layout: Layout, config: &StoreConfig) -> Self {
        Self {
            op,
            layout,
            prefix: config.prefix.trim_matches('/').to_string(),
            temp_dir: config.temp_dir.clone(),
            chunks: ChunkUploadConfig::from_store_config(config),
            retry: RetryConfig::query(),
        }
    }

    /// Override the retry policy used for manifest and segment round-trips.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Filesystem store rooted at the container directory `root`.
    pub fn local(root: &Path, config: &StoreConfig) -> Result<Self, StorageError> {
        let root = root.to_string_lossy();
        let builder = services::Fs::default().root(&root);
        let op = Operator::new(builder)?.finish();
        Ok(Self::new(op, Layout::Direct, config))
    }

    /// In-process object service with the segmented layout.
    pub fn memory(config: &StoreConfig) -> Result<Self, StorageError> {
        let builder = services::Memory::default().root("/");
        let op = Operator::new(builder)?.finish();
        Ok(Self::new(op, Layout::Segmented, config))
    }

    /// Remote object store for `config.provider`.
    pub fn remote(config: &StoreConfig) -> Result<Self, StorageError> {
        let op = remote_operator(config)?;
        Ok(Self::new(op, Layout::Segmented, config))
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub fn operator(&self) -> &Operator {
        &self.op
    }

    /// Full key of `snap`, below the prefix it belongs to.
    fn object_key(&self, snap: &Snapshot) -> String {
        let prefix = snap.storage_prefix(&self.prefix);
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            snap.relative_path()
        } else {
            format!("{prefix}/{}", snap.relative_path())
        }
    }

    async fn stage(&self, content: &mut SnapshotReader) -> Result<(tempfile::NamedTempFile, u64), StorageError> {
        let staged = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile_in(&self.temp_dir)?;
        let mut file = tokio::fs::File::from_std(staged.reopen()?);
        let size = tokio::io::copy(content, &mut file).await?;
        file.flush().await?;
        Ok((staged, size))
    }

    async fn save_direct(&self, path: &str, mut content: SnapshotReader) -> Result<(), StorageError> {
        let mut writer = self.op.writer(path).await?;
        let mut buf = vec![0u8; 1024 * 1024];
        loop {
            let n = content.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(buf[..n].to_vec()).await?;
        }
        writer.close().await?;
        Ok(())
    }

    async fn save_segmented(&self, path: &str, mut content: SnapshotReader) -> Result<(), StorageError> {
        let (staged, size) = self.stage(&mut content).await?;
        let chunks = plan_chunks(size, self.chunks.chunk_size);
        let manifest = Manifest {
            snapshot: path.to_string(),
            size,
            segments: chunks
                .iter()
                .map(|c| Segment { id: c.id, offset: c.offset, size: c.size })
                .collect(),
        };

        let staged_path = Arc::new(staged.path().to_path_buf());
        let op = self.op.clone();
        let base = path.to_string();
        let uploaded = ChunkUploader::new(self.chunks.clone())
            .upload(chunks, move |chunk| {
                let op = op.clone();
                let staged_path = staged_path.clone();
                let key = segment_key(&base, chunk.id);
                async move {
                    let mut file = tokio::fs::File::open(staged_path.as_ref()).await?;
                    file.seek(SeekFrom::Start(chunk.offset)).await?;
                    let mut buf = vec![0u8; chunk.size as usize];
                    file.read_exact(&mut buf).await?;
                    op.write(&key, buf).await?;
                    Ok::<(), StorageError>(())
                }
            })
            .await;

        if let Err(e) = uploaded {
            if let Err(cleanup) = self.delete_segments(path).await {
                warn!(snapshot = %path, "Failed to remove partial segments: {}", cleanup);
            }
            return Err(e);
        }

        let body = serde_json::to_vec(&manifest)?;
        retry("write manifest", &self.retry, || {
            let body = body.clone();
            async move { self.op.write(path, body).await.map(|_| ()) }
        })
        .await?;

        info!(snapshot = %path, size, segments = manifest.segments.len(), "Uploaded segmented snapshot");
        drop(staged);
        Ok(())
    }

    async fn read_manifest(&self, path: &str) -> Result<Manifest, StorageError> {
        let raw = match self.op.read(path).await {
            Ok(buf) => buf.to_vec(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Spool the snapshot into an anonymous temp file and return it rewound.
    async fn fetch_into_temp(&self, path: &str) -> Result<tokio::fs::File, StorageError> {
        let mut file = tokio::fs::File::from_std(tempfile::tempfile_in(&self.temp_dir)?);

        match self.layout {
            Layout::Direct => {
                let size = match self.op.stat(path).await {
                    Ok(meta) => meta.content_length(),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Err(StorageError::NotFound(path.to_string()))
                    }
                    Err(e) => return Err(e.into()),
                };
                let step = self.chunks.chunk_size.max(1);
                let mut offset = 0;
                while offset < size {
                    let end = (offset + step).min(size);
                    let buf = self.op.read_with(path).range(offset..end).await?;
                    file.write_all(&buf.to_vec()).await?;
                    offset = end;
                }
            }
            Layout::Segmented => {
                let manifest = self.read_manifest(path).await?;
                for segment in &manifest.segments {
                    let key = segment_key(path, segment.id);
                    let buf = retry("read segment", &self.retry, || self.op.read(&key)).await?;
                    if buf.len() as u64 != segment.size {
                        return Err(StorageError::Backend(format!(
                            "segment {} of {} has {} bytes, manifest expects {}",
                            segment.id,
                            path,
                            buf.len(),
                            segment.size
                        )));
                    }
                    file.write_all(&buf.to_vec()).await?;
                }
            }
        }

        file.flush().await?;
        file.rewind().await?;
        Ok(file)
    }

    async fn delete_segments(&self, path: &str) -> Result<usize, StorageError> {
        let entries = match self.op.list(&format!("{path}/")).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            if entry.metadata().mode() == EntryMode::FILE {
                self.op.delete(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl SnapStore for ObjectSnapStore {
    async fn save(&self, snap: &Snapshot, content: SnapshotReader) -> Result<(), StorageError> {
        let path = self.object_key(snap);
        match self.layout {
            Layout::Direct => self.save_direct(&path, content).await,
            Layout::Segmented => self.save_segmented(&path, content).await,
        }
    }

    async fn fetch(&self, snap: &Snapshot) -> Result<SnapshotReader, StorageError> {
        let file = self.fetch_into_temp(&self.object_key(snap)).await?;
        Ok(Box::new(file))
    }

    async fn list(&self, include_all: bool) -> Result<SnapList, StorageError> {
        let base = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let list_path = if base.is_empty() { "/" } else { base.as_str() };
        let entries = match self.op.list_with(list_path).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.metadata().mode() != EntryMode::FILE {
                continue;
            }
            let Some(relative) = entry.path().strip_prefix(base.as_str()) else {
                continue;
            };
            match Snapshot::parse(relative) {
                Ok(mut snap) => {
                    if snap.is_chunk && !include_all {
                        continue;
                    }
                    snap.prefix = self.prefix.clone();
                    snapshots.push(snap);
                }
                Err(e) => debug!(key = %entry.path(), "Skipping unrecognised object: {}", e),
            }
        }
        Ok(SnapList::sorted(snapshots))
    }

    async fn delete(&self, snap: &Snapshot) -> Result<(), StorageError> {
        let path = self.object_key(snap);
        if self.layout == Layout::Segmented {
            let removed = self.delete_segments(&path).await?;
            debug!(snapshot = %path, removed, "Removed snapshot segments");
        }
        self.op.delete(&path).await?;
        Ok(())
    }

    async fn probe(&self) -> Result<(), StorageError> {
        self.op.check().await?;
        Ok(())
    }
}

fn remote_operator(config: &StoreConfig) -> Result<Operator, StorageError> {
    let Credentials {
        endpoint,
        region,
        access_key_id,
        secret_access_key,
        credential_file,
    } = &config.credentials;
    let root = "/";

    let op = match config.provider {
        Provider::S3 | Provider::Ecs | Provider::Ocs => {
            let mut builder = services::S3::default()
                .bucket(&config.container)
                .root(root)
                .region(region.as_deref().unwrap_or(DEFAULT_S3_REGION));
            if let Some(ep) = endpoint {
                builder = builder.endpoint(ep);
            }
            if let Some(key_id) = access_key_id {
                builder = builder.access_key_id(key_id);
            }
            if let Some(secret) = secret_access_key {
                builder = builder.secret_access_key(secret);
            }
            Operator::new(builder)?.finish()
        }
        Provider::Abs => {
            let mut builder = services::Azblob::default()
                .container(&config.container)
                .root(root);
            match (endpoint, access_key_id) {
                (Some(ep), _) => builder = builder.endpoint(ep),
                (None, Some(account)) => {
                    builder = builder.endpoint(&format!("https://{account}.blob.core.windows.net"))
                }
                (None, None) => {}
            }
            if let Some(account) = access_key_id {
                builder = builder.account_name(account);
            }
            if let Some(key) = secret_access_key {
                builder = builder.account_key(key);
            }
            Operator::new(builder)?.finish()
        }
        Provider::Gcs => {
            let mut builder = services::Gcs::default().bucket(&config.container).root(root);
            if let Some(ep) = endpoint {
                builder = builder.endpoint(ep);
            }
            if let Some(file) = credential_file {
                builder = builder.credential_path(&file.to_string_lossy());
            }
            Operator::new(builder)?.finish()
        }
        Provider::Swift => {
            let Some(ep) = endpoint else {
                return Err(StorageError::Config("swift requires an auth endpoint".into()));
            };
            let mut builder = services::Swift::default()
                .endpoint(ep)
                .container(&config.container)
                .root(root);
            if let Some(token) = secret_access_key {
                builder = builder.token(token);
            }
            Operator::new(builder)?.finish()
        }
        Provider::Oss => {
            let mut builder = services::Oss::default().bucket(&config.container).root(root);
            if let Some(ep) = endpoint {
                builder = builder.endpoint(ep);
            }
            if let Some(key_id) = access_key_id {
                builder = builder.access_key_id(key_id);
            }
            if let Some(secret) = secret_access_key {
                builder = builder.access_key_secret(secret);
            }
            Operator::new(builder)?.finish()
        }
        Provider::Local | Provider::Memory | Provider::FakeFailed => {
            return Err(StorageError::Config(format!(
                "{} is not an object storage provider",
                config.provider
            )))
        }
    };
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotKind;

    fn small_chunks(temp_dir: &Path) -> StoreConfig {
        StoreConfig {
            temp_dir: temp_dir.to_path_buf(),
            min_chunk_size: 4,
            chunk_backoff_ms: 1,
            ..Default::default()
        }
    }

    fn snap(last: u64) -> Snapshot {
        Snapshot::with_created_on(SnapshotKind::Full, 0, last, 1_700_000_000)
    }

    async fn read_all(mut reader: SnapshotReader) -> Vec<u8> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_segmented_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectSnapStore::memory(&small_chunks(tmp.path())).unwrap();
        let s = snap(10);

        store.save(&s, Box::new(&b"0123456789"[..])).await.unwrap();

        let manifest = store.read_manifest(&store.object_key(&s)).await.unwrap();
        assert_eq!(manifest.size, 10);
        assert_eq!(manifest.segments.len(), 3);
        assert_eq!(read_all(store.fetch(&s).await.unwrap()).await, b"0123456789");
    }

    #[tokio::test]
    async fn test_list_hides_segments_unless_requested() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectSnapStore::memory(&small_chunks(tmp.path())).unwrap();
        store.save(&snap(10), Box::new(&b"12345678"[..])).await.unwrap();

        let visible = store.list(false).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].prefix, "v2");

        let all = store.list(true).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.iter().filter(|s| s.is_chunk).count(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectSnapStore::memory(&small_chunks(tmp.path())).unwrap();
        let s = snap(3);
        store.save(&s, Box::new(&b"abcdefgh"[..])).await.unwrap();

        store.delete(&s).await.unwrap();
        assert!(store.list(true).await.unwrap().is_empty());
        assert!(matches!(store.fetch(&s).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_direct_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("store");
        let config = small_chunks(tmp.path());
        let store = ObjectSnapStore::local(&root, &config).unwrap();
        let s = snap(20).in_dir("Backup-1700000000");

        store.save(&s, Box::new(&b"local snapshot"[..])).await.unwrap();

        assert!(root.join("v2").join("Backup-1700000000").join(&s.snap_name).is_file());
        assert_eq!(read_all(store.fetch(&s).await.unwrap()).await, b"local snapshot");

        let list = store.list(true).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].snap_dir, "Backup-1700000000");

        store.delete(&s).await.unwrap();
        assert!(store.list(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_foreign_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ObjectSnapStore::memory(&small_chunks(tmp.path())).unwrap();
        store.operator().write("v2/README.txt", b"not a snapshot".to_vec()).await.unwrap();
        store.save(&snap(1), Box::new(&b"x"[..])).await.unwrap();

        assert_eq!(store.list(false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_v1_snapshot_reachable_from_v2_store() {
        let tmp = tempfile::tempdir().unwrap();
        let current = ObjectSnapStore::memory(&small_chunks(tmp.path())).unwrap();
        let legacy_config = StoreConfig {
            prefix: "v1".into(),
            ..small_chunks(tmp.path())
        };
        let legacy = ObjectSnapStore::new(current.operator().clone(), Layout::Segmented, &legacy_config);

        let s = snap(7);
        legacy.save(&s, Box::new(&b"old layout"[..])).await.unwrap();
        assert!(current.list(false).await.unwrap().is_empty());

        let listed_v1 = legacy.list(false).await.unwrap();
        assert_eq!(listed_v1[0].prefix, "v1");
        let old = listed_v1[0].clone();
        assert_eq!(read_all(current.fetch(&old).await.unwrap()).await, b"old layout");
        assert!(matches!(current.fetch(&s).await, Err(StorageError::NotFound(_))));

        current.delete(&old).await.unwrap();
        assert!(legacy.list(true).await.unwrap().is_empty());
    }

    #[test]
    fn test_segment_key_layout() {
        assert_eq!(segment_key("Full-1", 3), "Full-1/0000000003");
    }

    #[test]
    fn test_remote_rejects_local_provider() {
        let config = StoreConfig::default();
        assert!(matches!(
            ObjectSnapStore::remote(&config),
            Err(StorageError::Config(_))
        ));
    }

    #[test]
    fn test_remote_s3_builds_without_network() {
        let config = StoreConfig {
            provider: Provider::S3,
            container: "etcd-backups".into(),
            credentials: Credentials {
                endpoint: Some("http://127.0.0.1:9000".into()),
                access_key_id: Some("minio".into()),
                secret_access_key: Some("minio123".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let store = ObjectSnapStore::remote(&config).unwrap();
        assert_eq!(store.layout(), Layout::Segmented);
    }
}
