// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error-reshaping wrapper around one concrete backend.
//!
//! Inside a dual store a listing that errors on a flaky endpoint would turn
//! into a failed merge. This wrapper turns a transient List failure into an
//! empty listing so the other endpoint's entries still come through. Every
//! other operation passes its error through unchanged, so Save/Fetch
//! failover and the primary circuit still see the real cause.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::resilience::classify::{classify, ErrorClass};
use crate::snapshot::{SnapList, Snapshot};
use super::traits::{SnapStore, SnapshotReader, StorageError};

/// Default bound for [`ResilientSnapStore::health_check`].
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

const ACTOR: &str = "resilient-snapstore";

pub struct ResilientSnapStore {
    inner: Arc<dyn SnapStore>,
    label: String,
    health_check_timeout: Duration,
}

impl ResilientSnapStore {
    pub fn new(inner: Arc<dyn SnapStore>, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// One bounded round-trip against the backend.
    ///
    /// A failure comes back as [`StorageError::HealthCheck`] tagged with
    /// the class of its cause; [`classify`] returns that class.
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let outcome = match tokio::time::timeout(self.health_check_timeout, self.inner.probe()).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                operation: "health check".into(),
                after: self.health_check_timeout,
            }),
        };

        match outcome {
            Ok(()) => {
                debug!(actor = ACTOR, endpoint = %self.label, "Health check passed");
                Ok(())
            }
            Err(e) => {
                let class = self.log_failure("health check", &e);
                Err(StorageError::HealthCheck {
                    class,
                    source: Box::new(e),
                })
            }
        }
    }

    fn log_failure(&self, operation: &str, err: &StorageError) -> ErrorClass {
        let class = classify(err);
        match class {
            ErrorClass::Transient => warn!(
                actor = ACTOR,
                endpoint = %self.label,
                operation,
                "Transient error during {}: {}", operation, err
            ),
            ErrorClass::Fatal => error!(
                actor = ACTOR,
                endpoint = %self.label,
                operation,
                "Fatal error during {}: {}", operation, err
            ),
        }
        class
    }
}

#[async_trait]
impl SnapStore for ResilientSnapStore {
    async fn save(&self, snap: &Snapshot, content: SnapshotReader) -> Result<(), StorageError> {
        self.inner.save(snap, content).await.inspect_err(|e| {
            self.log_failure("save", e);
        })
    }

    async fn fetch(&self, snap: &Snapshot) -> Result<SnapshotReader, StorageError> {
        self.inner.fetch(snap).await.inspect_err(|e| {
            self.log_failure("fetch", e);
        })
    }

    async fn list(&self, include_all: bool) -> Result<SnapList, StorageError> {
        match self.inner.list(include_all).await {
            Ok(list) => Ok(list),
            Err(e) => match self.log_failure("list", &e) {
                ErrorClass::Transient => {
                    warn!(
                        actor = ACTOR,
                        endpoint = %self.label,
                        "Returning empty snapshot list because of a transient error"
                    );
                    Ok(SnapList::new())
                }
                ErrorClass::Fatal => Err(e),
            },
        }
    }

    async fn delete(&self, snap: &Snapshot) -> Result<(), StorageError> {
        self.inner.delete(snap).await.inspect_err(|e| {
            self.log_failure("delete", e);
        })
    }

    async fn probe(&self) -> Result<(), StorageError> {
        self.health_check().await
    }
}
