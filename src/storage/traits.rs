use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::resilience::classify::ErrorClass;
use crate::snapshot::{SnapList, Snapshot, SnapshotParseError};

/// Byte stream carrying snapshot content in and out of a store.
pub type SnapshotReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("snapshot not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object storage error: {0}")]
    Object(#[from] opendal::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotParseError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unsupported storage provider: {0}")]
    UnsupportedProvider(String),
    #[error("{operation}: connection timeout after {after:?}")]
    Timeout { operation: String, after: Duration },
    #[error("chunk {chunk_id} at offset {offset} failed after {attempts} attempts: {source}")]
    ChunkUpload {
        chunk_id: usize,
        offset: u64,
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },
    #[error("failed to create {endpoint} snapstore: {source}")]
    Construction {
        endpoint: Endpoint,
        #[source]
        source: Box<StorageError>,
    },
    /// Health-check failure carrying the class of its cause.
    #[error("{class} error during health check: {source}")]
    HealthCheck {
        class: ErrorClass,
        #[source]
        source: Box<StorageError>,
    },
    #[error("primary endpoint disabled due to repeated failures")]
    PrimaryDisabled,
    #[error("failed to {operation} on both endpoints - Primary: {primary}, Secondary: {secondary}")]
    BothEndpointsFailed {
        operation: String,
        primary: Box<StorageError>,
        secondary: Box<StorageError>,
    },
    #[error("both endpoints temporarily unavailable - Primary: {primary}, Secondary: {secondary}")]
    BothEndpointsUnavailable {
        primary: Box<StorageError>,
        secondary: Box<StorageError>,
    },
}

impl StorageError {
    pub(crate) fn both_failed(
        operation: impl Into<String>,
        primary: StorageError,
        secondary: StorageError,
    ) -> Self {
        Self::BothEndpointsFailed {
            operation: operation.into(),
            primary: Box::new(primary),
            secondary: Box::new(secondary),
        }
    }

    pub(crate) fn construction(endpoint: Endpoint, source: StorageError) -> Self {
        Self::Construction {
            endpoint,
            source: Box::new(source),
        }
    }
}

/// Which side of a dual-endpoint setup an operation ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Primary,
    Secondary,
}

impl Endpoint {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one endpoint's attempt at an operation.
#[derive(Debug)]
pub struct OperationResult {
    pub endpoint: Endpoint,
    pub success: bool,
    pub error: Option<StorageError>,
}

impl OperationResult {
    #[must_use]
    pub fn ok(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(endpoint: Endpoint, error: StorageError) -> Self {
        Self {
            endpoint,
            success: false,
            error: Some(error),
        }
    }

    pub(crate) fn from_result(endpoint: Endpoint, result: Result<(), StorageError>) -> Self {
        match result {
            Ok(()) => Self::ok(endpoint),
            Err(e) => Self::failed(endpoint, e),
        }
    }

    /// Take the error out, substituting a placeholder if the result succeeded.
    pub(crate) fn into_error(self) -> StorageError {
        self.error
            .unwrap_or_else(|| StorageError::Backend(format!("{} reported no error", self.endpoint)))
    }
}

/// Storage capability contract shared by concrete backends and the
/// resilient/dual composites.
#[async_trait]
pub trait SnapStore: Send + Sync {
    /// Persist `content` as the object for `snap`.
    async fn save(&self, snap: &Snapshot, content: SnapshotReader) -> Result<(), StorageError>;

    /// Open the content of `snap` for reading.
    async fn fetch(&self, snap: &Snapshot) -> Result<SnapshotReader, StorageError>;

    /// List snapshots in domain order. Chunk segments are only returned
    /// when `include_all` is set.
    async fn list(&self, include_all: bool) -> Result<SnapList, StorageError>;

    async fn delete(&self, snap: &Snapshot) -> Result<(), StorageError>;

    /// Lightweight round-trip proving the backend is reachable.
    /// Default implementation falls back to a listing.
    async fn probe(&self) -> Result<(), StorageError> {
        self.list(false).await.map(|_| ())
    }
}
