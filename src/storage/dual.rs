// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dual-endpoint snapshot store with primary failover.
//!
//! # Operation semantics
//!
//! | Operation | Endpoints | Succeeds when |
//! |-----------|-----------|---------------|
//! | Save      | primary, then secondary on failure | either succeeds |
//! | Fetch     | primary, then secondary on failure | either succeeds |
//! | List      | both, concurrently, merged | at least one succeeds |
//! | Delete    | both, concurrently | at least one succeeds |
//!
//! Save and Fetch consult the [`PrimaryCircuit`]: after repeated transient
//! primary failures the primary is skipped entirely. List and Delete always
//! contact both endpoints.
//!
//! Listings are merged on `(snap_dir, snap_name)` with the primary's entry
//! winning collisions, then sorted in domain order.
//!
//! ```text
//!   save ──► primary ──ok──► done
//!               │ err (recorded in circuit)
//!               ▼
//!            secondary ──ok──► done
//!               │ err
//!               ▼
//!        BothEndpointsFailed
//! ```

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::metrics::{self, LatencyTimer};
use crate::resilience::circuit_breaker::{CircuitConfig, PrimaryCircuit};
use crate::resilience::classify::{classify, ErrorClass};
use crate::snapshot::{SnapList, Snapshot};
use super::traits::{Endpoint, OperationResult, SnapStore, SnapshotReader, StorageError};

const ACTOR: &str = "dual-snapstore";

/// Two stores composed into one, with the primary preferred.
pub struct DualSnapStore {
    primary: Arc<dyn SnapStore>,
    secondary: Arc<dyn SnapStore>,
    circuit: PrimaryCircuit,
}

impl DualSnapStore {
    pub fn new(primary: Arc<dyn SnapStore>, secondary: Arc<dyn SnapStore>) -> Self {
        Self {
            primary,
            secondary,
            circuit: PrimaryCircuit::with_defaults(Endpoint::Primary.as_str()),
        }
    }

    pub fn with_circuit_config(
        primary: Arc<dyn SnapStore>,
        secondary: Arc<dyn SnapStore>,
        config: CircuitConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            circuit: PrimaryCircuit::new(Endpoint::Primary.as_str(), config),
        }
    }

    /// Breaker guarding the primary endpoint.
    #[must_use]
    pub fn circuit(&self) -> &PrimaryCircuit {
        &self.circuit
    }

    #[must_use]
    pub fn is_primary_disabled(&self) -> bool {
        self.circuit.is_disabled()
    }

    fn record_primary_failure(&self, err: &StorageError) {
        self.circuit.record_failure(classify(err));
    }

    async fn save_to(&self, endpoint: Endpoint, snap: &Snapshot, content: &Bytes) -> OperationResult {
        let store = match endpoint {
            Endpoint::Primary => &self.primary,
            Endpoint::Secondary => &self.secondary,
        };
        let _timer = LatencyTimer::new(endpoint.as_str(), "save");
        let reader: SnapshotReader = Box::new(Cursor::new(content.clone()));

        match store.save(snap, reader).await {
            Ok(()) => {
                info!(
                    actor = ACTOR,
                    snapshot = %snap.snap_name,
                    endpoint = %endpoint,
                    "Successfully saved snapshot {} to {} endpoint", snap.snap_name, endpoint
                );
                metrics::record_operation(endpoint.as_str(), "save", "success");
                OperationResult::ok(endpoint)
            }
            Err(e) => {
                error!(
                    actor = ACTOR,
                    snapshot = %snap.snap_name,
                    endpoint = %endpoint,
                    "Failed to save snapshot {} to {} endpoint: {}", snap.snap_name, endpoint, e
                );
                metrics::record_operation(endpoint.as_str(), "save", "error");
                OperationResult::failed(endpoint, e)
            }
        }
    }

    async fn list_from(&self, endpoint: Endpoint, include_all: bool) -> Result<SnapList, StorageError> {
        let store = match endpoint {
            Endpoint::Primary => &self.primary,
            Endpoint::Secondary => &self.secondary,
        };
        let _timer = LatencyTimer::new(endpoint.as_str(), "list");

        match store.list(include_all).await {
            Ok(list) => {
                info!(
                    actor = ACTOR,
                    endpoint = %endpoint,
                    count = list.len(),
                    "Listed {} snapshots from {} endpoint", list.len(), endpoint
                );
                metrics::record_operation(endpoint.as_str(), "list", "success");
                Ok(list)
            }
            Err(e) => {
                match classify(&e) {
                    ErrorClass::Transient => warn!(
                        actor = ACTOR,
                        endpoint = %endpoint,
                        "Transient error listing snapshots from {} endpoint: {}", endpoint, e
                    ),
                    ErrorClass::Fatal => error!(
                        actor = ACTOR,
                        endpoint = %endpoint,
                        "Failed to list snapshots from {} endpoint: {}", endpoint, e
                    ),
                }
                metrics::record_operation(endpoint.as_str(), "list", "error");
                Err(e)
            }
        }
    }

    async fn delete_from(&self, endpoint: Endpoint, snap: &Snapshot) -> OperationResult {
        let store = match endpoint {
            Endpoint::Primary => &self.primary,
            Endpoint::Secondary => &self.secondary,
        };
        let _timer = LatencyTimer::new(endpoint.as_str(), "delete");

        let result = store.delete(snap).await;
        match &result {
            Ok(()) => {
                debug!(
                    actor = ACTOR,
                    snapshot = %snap.snap_name,
                    endpoint = %endpoint,
                    "Deleted snapshot {} from {} endpoint", snap.snap_name, endpoint
                );
                metrics::record_operation(endpoint.as_str(), "delete", "success");
            }
            Err(e) => {
                error!(
                    actor = ACTOR,
                    snapshot = %snap.snap_name,
                    endpoint = %endpoint,
                    "Failed to delete snapshot {} from {} endpoint: {}", snap.snap_name, endpoint, e
                );
                metrics::record_operation(endpoint.as_str(), "delete", "error");
            }
        }
        OperationResult::from_result(endpoint, result)
    }
}

#[async_trait]
impl SnapStore for DualSnapStore {
    async fn save(&self, snap: &Snapshot, mut content: SnapshotReader) -> Result<(), StorageError> {
        // Buffer once so the same bytes can be replayed to the secondary.
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).await?;
        let content = Bytes::from(buf);

        let primary = if self.circuit.is_disabled() {
            warn!(
                actor = ACTOR,
                snapshot = %snap.snap_name,
                "Primary endpoint disabled due to repeated failures, saving snapshot {} to secondary only",
                snap.snap_name
            );
            self.circuit.record_skip();
            metrics::record_operation(Endpoint::Primary.as_str(), "save", "skipped");
            OperationResult::failed(Endpoint::Primary, StorageError::PrimaryDisabled)
        } else {
            let result = self.save_to(Endpoint::Primary, snap, &content).await;
            match &result.error {
                None => {
                    self.circuit.reset();
                    return Ok(());
                }
                Some(e) => self.record_primary_failure(e),
            }
            result
        };

        let secondary = self.save_to(Endpoint::Secondary, snap, &content).await;
        if secondary.success {
            return Ok(());
        }

        Err(StorageError::both_failed(
            "save snapshot",
            primary.into_error(),
            secondary.into_error(),
        ))
    }

    async fn fetch(&self, snap: &Snapshot) -> Result<SnapshotReader, StorageError> {
        let primary_err = if self.circuit.is_disabled() {
            warn!(
                actor = ACTOR,
                snapshot = %snap.snap_name,
                "Primary endpoint disabled due to repeated failures, fetching snapshot {} from secondary only",
                snap.snap_name
            );
            self.circuit.record_skip();
            metrics::record_operation(Endpoint::Primary.as_str(), "fetch", "skipped");
            StorageError::PrimaryDisabled
        } else {
            let _timer = LatencyTimer::new(Endpoint::Primary.as_str(), "fetch");
            match self.primary.fetch(snap).await {
                Ok(reader) => {
                    self.circuit.reset();
                    debug!(
                        actor = ACTOR,
                        snapshot = %snap.snap_name,
                        "Fetched snapshot {} from primary endpoint", snap.snap_name
                    );
                    metrics::record_operation(Endpoint::Primary.as_str(), "fetch", "success");
                    return Ok(reader);
                }
                Err(e) => {
                    error!(
                        actor = ACTOR,
                        snapshot = %snap.snap_name,
                        "Failed to fetch snapshot {} from primary endpoint: {}", snap.snap_name, e
                    );
                    metrics::record_operation(Endpoint::Primary.as_str(), "fetch", "error");
                    self.record_primary_failure(&e);
                    e
                }
            }
        };

        let _timer = LatencyTimer::new(Endpoint::Secondary.as_str(), "fetch");
        match self.secondary.fetch(snap).await {
            Ok(reader) => {
                info!(
                    actor = ACTOR,
                    snapshot = %snap.snap_name,
                    "Fetched snapshot {} from secondary endpoint", snap.snap_name
                );
                metrics::record_operation(Endpoint::Secondary.as_str(), "fetch", "success");
                Ok(reader)
            }
            Err(e) => {
                error!(
                    actor = ACTOR,
                    snapshot = %snap.snap_name,
                    "Failed to fetch snapshot {} from secondary endpoint: {}", snap.snap_name, e
                );
                metrics::record_operation(Endpoint::Secondary.as_str(), "fetch", "error");
                Err(StorageError::both_failed("fetch snapshot", primary_err, e))
            }
        }
    }

    async fn list(&self, include_all: bool) -> Result<SnapList, StorageError> {
        let (primary, secondary) = tokio::join!(
            self.list_from(Endpoint::Primary, include_all),
            self.list_from(Endpoint::Secondary, include_all),
        );

        let (primary, secondary) = match (primary, secondary) {
            (Ok(p), Ok(s)) => (p, s),
            (Ok(p), Err(_)) => (p, SnapList::new()),
            (Err(_), Ok(s)) => (SnapList::new(), s),
            (Err(p), Err(s)) => {
                if classify(&p).is_transient() && classify(&s).is_transient() {
                    error!(actor = ACTOR, "Both endpoints temporarily unavailable for listing");
                    return Err(StorageError::BothEndpointsUnavailable {
                        primary: Box::new(p),
                        secondary: Box::new(s),
                    });
                }
                return Err(StorageError::both_failed("list snapshots", p, s));
            }
        };

        let (primary_count, secondary_count) = (primary.len(), secondary.len());
        let merged = SnapList::merge_preferring(primary, secondary);
        info!(
            actor = ACTOR,
            total = merged.len(),
            primary = primary_count,
            secondary = secondary_count,
            "Merged snapshot list: {} snapshots total (Primary: {}, Secondary: {})",
            merged.len(), primary_count, secondary_count
        );
        metrics::record_merged_list(merged.len(), primary_count, secondary_count);
        Ok(merged)
    }

    async fn delete(&self, snap: &Snapshot) -> Result<(), StorageError> {
        let (primary, secondary) = tokio::join!(
            self.delete_from(Endpoint::Primary, snap),
            self.delete_from(Endpoint::Secondary, snap),
        );

        match (primary.success, secondary.success) {
            (true, true) => Ok(()),
            (false, false) => Err(StorageError::both_failed(
                "delete snapshot",
                primary.into_error(),
                secondary.into_error(),
            )),
            (p, s) => {
                warn!(
                    actor = ACTOR,
                    snapshot = %snap.snap_name,
                    "Snapshot {} deleted from only one endpoint - Primary: {}, Secondary: {}",
                    snap.snap_name, p, s
                );
                metrics::record_single_endpoint_delete();
                Ok(())
            }
        }
    }

    /// Healthy when either endpoint answers.
    async fn probe(&self) -> Result<(), StorageError> {
        let (primary, secondary) = tokio::join!(self.primary.probe(), self.secondary.probe());
        match (primary, secondary) {
            (Err(p), Err(s)) => Err(StorageError::both_failed("probe", p, s)),
            _ => Ok(()),
        }
    }
}
