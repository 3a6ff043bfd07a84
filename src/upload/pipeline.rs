// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Worker pool and retry coordinator for chunk uploads.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{Chunk, ChunkResult, ChunkUploadConfig};
use crate::metrics;
use crate::storage::traits::StorageError;

const ACTOR: &str = "chunk-uploader";

/// Totals of a successful upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub chunks: usize,
    /// Upload attempts made, including retries
    pub attempts: u64,
}

/// Uploads a set of chunks through a bounded worker pool.
pub struct ChunkUploader {
    config: ChunkUploadConfig,
}

impl ChunkUploader {
    pub fn new(config: ChunkUploadConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkUploadConfig {
        &self.config
    }

    /// Upload every chunk with `upload`, retrying failed chunks with
    /// exponential backoff.
    ///
    /// Returns once all chunks succeeded, or with [`StorageError::ChunkUpload`]
    /// as soon as one chunk failed `max_attempts` times. In-flight uploads
    /// and pending retries are cancelled on return.
    pub async fn upload<F, Fut>(&self, chunks: Vec<Chunk>, upload: F) -> Result<UploadSummary, StorageError>
    where
        F: Fn(Chunk) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StorageError>> + Send + 'static,
    {
        let total = chunks.len();
        if total == 0 {
            return Ok(UploadSummary::default());
        }
        info!(actor = ACTOR, chunks = total, "Uploading snapshot in {} chunks", total);

        let upload = Arc::new(upload);
        let (work_tx, work_rx) = mpsc::unbounded_channel::<Chunk>();
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<ChunkResult>();
        let (stop_tx, stop_rx) = watch::channel(false);

        for chunk in chunks {
            work_tx
                .send(chunk)
                .map_err(|_| StorageError::Backend("chunk work queue closed".into()))?;
        }

        let mut workers = JoinSet::new();
        for worker in 0..self.config.max_parallel.clamp(1, total) {
            workers.spawn(run_worker(
                worker,
                work_rx.clone(),
                result_tx.clone(),
                stop_rx.clone(),
                upload.clone(),
            ));
        }
        // Workers hold the only senders: the result queue closes if they all exit.
        drop(result_tx);

        let mut retries = JoinSet::new();
        let mut remaining = total;
        let mut attempts = 0u64;

        let outcome = loop {
            let Some(ChunkResult { chunk, error }) = result_rx.recv().await else {
                break Err(StorageError::Backend(
                    "chunk workers exited before all chunks were uploaded".into(),
                ));
            };
            attempts += 1;

            let Some(err) = error else {
                metrics::record_chunk_upload("success");
                remaining -= 1;
                debug!(actor = ACTOR, chunk = chunk.id, remaining, "Chunk {} uploaded", chunk.id);
                if remaining == 0 {
                    info!(actor = ACTOR, "All {} chunks uploaded, stopping workers", total);
                    break Ok(UploadSummary { chunks: total, attempts });
                }
                continue;
            };

            metrics::record_chunk_upload("error");
            if chunk.attempt >= self.config.max_attempts {
                error!(
                    actor = ACTOR,
                    chunk = chunk.id,
                    offset = chunk.offset,
                    "Chunk {} still failing after {} attempts, stopping all workers: {}",
                    chunk.id, chunk.attempt, err
                );
                break Err(StorageError::ChunkUpload {
                    chunk_id: chunk.id,
                    offset: chunk.offset,
                    attempts: chunk.attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.config.backoff_for(chunk.attempt);
            let next = Chunk { attempt: chunk.attempt + 1, ..chunk };
            warn!(
                actor = ACTOR,
                chunk = chunk.id,
                offset = chunk.offset,
                "Chunk {} failed ({}), retrying at attempt {} after {:?}",
                chunk.id, err, next.attempt, delay
            );
            metrics::record_chunk_retry();

            let work_tx = work_tx.clone();
            let mut stop = stop_rx.clone();
            retries.spawn(async move {
                tokio::select! {
                    _ = wait_for_stop(&mut stop) => {}
                    _ = tokio::time::sleep(delay) => {
                        if !*stop.borrow() {
                            let _ = work_tx.send(next);
                        }
                    }
                }
            });
        };

        stop_tx.send_replace(true);
        workers.shutdown().await;
        retries.shutdown().await;
        outcome
    }
}

async fn run_worker<F, Fut>(
    worker: usize,
    work_rx: Arc<Mutex<mpsc::UnboundedReceiver<Chunk>>>,
    results: mpsc::UnboundedSender<ChunkResult>,
    mut stop: watch::Receiver<bool>,
    upload: Arc<F>,
) where
    F: Fn(Chunk) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StorageError>> + Send + 'static,
{
    loop {
        let next = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut stop) => None,
                chunk = rx.recv() => chunk,
            }
        };
        let Some(chunk) = next else {
            break;
        };

        debug!(actor = ACTOR, worker, chunk = chunk.id, attempt = chunk.attempt, "Uploading chunk");
        let error = upload(chunk).await.err();
        if results.send(ChunkResult { chunk, error }).is_err() {
            break;
        }
    }
    debug!(actor = ACTOR, worker, "Chunk worker stopped");
}

/// Resolves once the stop signal fired (or its sender is gone).
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
