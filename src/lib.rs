//! # Snapstore
//!
//! Snapshot storage layer for etcd backup/restore, with dual-endpoint
//! redundancy so a snapshot write or read survives the loss of one
//! storage endpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      StoreResolver                          │
//! │  • Reads StoreConfig, fills env/default fallbacks           │
//! │  • Decides single / dual / degraded shape at startup        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DualSnapStore                          │
//! │  • Save/Fetch: primary first, secondary on failure          │
//! │  • List/Delete: both endpoints concurrently, merged         │
//! │  • Primary circuit: skip primary after repeated             │
//! │    transient failures                                       │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────┐  ┌───────────────────────────┐
//! │ ResilientSnapStore (S3)   │  │ ResilientSnapStore (S3)   │
//! │ transient List → empty    │  │ transient List → empty    │
//! └───────────────────────────┘  └───────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        ObjectSnapStore (opendal) / MemorySnapStore          │
//! │  • Segmented uploads through the chunk pipeline             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapstore::{resolve_resilient_store, Provider, SecondaryConfig, Snapshot, SnapshotKind, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), snapstore::StorageError> {
//!     let config = StoreConfig {
//!         provider: Provider::S3,
//!         container: "etcd-backups".into(),
//!         secondary: Some(SecondaryConfig {
//!             provider: Provider::Gcs,
//!             container: "etcd-backups-dr".into(),
//!             ..Default::default()
//!         }),
//!         ..Default::default()
//!     };
//!
//!     let resolved = resolve_resilient_store(&config).await?;
//!     println!("snapstore started ({})", resolved.shape);
//!
//!     let snap = Snapshot::new(SnapshotKind::Full, 0, 1000);
//!     let data: &[u8] = b"etcd snapshot bytes";
//!     resolved.store.save(&snap, Box::new(data)).await?;
//!
//!     for snap in &resolved.store.list(false).await? {
//!         println!("{snap}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`snapshot`]: Snapshot names, parsing and ordered lists
//! - [`storage`]: The [`SnapStore`] contract, backends, dual store and resolver
//! - [`resilience`]: Error classification, primary circuit, retry policies
//! - [`upload`]: Chunked upload worker pool
//! - [`config`]: Store configuration

pub mod config;
pub mod snapshot;
pub mod storage;
pub mod resilience;
pub mod upload;
pub mod metrics;

pub use config::{Credentials, Provider, SecondaryConfig, StoreConfig};
pub use snapshot::{SnapList, Snapshot, SnapshotKind, SnapshotParseError};
pub use storage::traits::{Endpoint, OperationResult, SnapStore, SnapshotReader, StorageError};
pub use storage::dual::DualSnapStore;
pub use storage::resilient::ResilientSnapStore;
pub use storage::memory::MemorySnapStore;
pub use storage::failed::FailedSnapStore;
pub use storage::object::ObjectSnapStore;
pub use storage::factory::{
    resolve_resilient_store, resolve_store, BackendFactory, ProviderFactory, ResolvedStore,
    StoreResolver, StoreShape,
};
pub use resilience::classify::{classify, ErrorClass};
pub use resilience::circuit_breaker::{CircuitConfig, CircuitState, PrimaryCircuit};
pub use resilience::retry::RetryConfig;
pub use upload::{Chunk, ChunkUploadConfig, ChunkUploader};
pub use metrics::LatencyTimer;
