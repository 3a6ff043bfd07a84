// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chunked upload of large snapshot objects.
//!
//! A snapshot is cut into [`Chunk`]s of a fixed size. A bounded pool of
//! workers uploads them in parallel; a coordinator collects results,
//! schedules delayed retries for failed chunks and stops the pool as soon
//! as either every chunk landed or one chunk exhausted its attempts.
//!
//! ```text
//!             ┌──────────── retry after 2^attempt units ───────────┐
//!             ▼                                                     │
//!   chunks ─► work queue ─► N workers ─► result queue ─► coordinator
//!                               ▲                           │
//!                               └──────── stop signal ◄─────┘
//! ```

pub mod pipeline;

use std::time::Duration;

use crate::config::StoreConfig;
use crate::storage::traits::StorageError;

pub use pipeline::ChunkUploader;

/// One slice of a snapshot's byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub id: usize,
    pub offset: u64,
    pub size: u64,
    /// 1-based attempt number of the upload carrying this chunk
    pub attempt: u32,
}

/// Outcome of one upload attempt, as reported by a worker.
#[derive(Debug)]
pub struct ChunkResult {
    pub chunk: Chunk,
    pub error: Option<StorageError>,
}

#[derive(Debug, Clone)]
pub struct ChunkUploadConfig {
    /// Workers uploading concurrently
    pub max_parallel: usize,
    /// Chunk size in bytes (the last chunk may be smaller)
    pub chunk_size: u64,
    /// Attempts per chunk before the whole upload fails
    pub max_attempts: u32,
    /// Backoff time unit: the retry after attempt n waits 2^n units
    pub backoff_unit: Duration,
}

impl Default for ChunkUploadConfig {
    fn default() -> Self {
        Self {
            max_parallel: 5,
            chunk_size: 5 * 1024 * 1024,
            max_attempts: 5,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl ChunkUploadConfig {
    #[must_use]
    pub fn from_store_config(config: &StoreConfig) -> Self {
        Self {
            max_parallel: config.max_parallel_chunks.max(1),
            chunk_size: config.min_chunk_size.max(1),
            max_attempts: config.max_chunk_attempts.max(1),
            backoff_unit: config.chunk_backoff_unit(),
        }
    }

    /// Delay before re-submitting a chunk whose attempt `attempt` failed.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

/// Cut `total_size` bytes into chunks of `chunk_size` (last one shorter).
///
/// An empty object still yields one zero-length chunk so that something
/// is written for it.
#[must_use]
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    if total_size == 0 {
        return vec![Chunk { id: 1, offset: 0, size: 0, attempt: 1 }];
    }

    let count = total_size.div_ceil(chunk_size);
    (0..count)
        .map(|i| {
            let offset = i * chunk_size;
            Chunk {
                id: i as usize + 1,
                offset,
                size: chunk_size.min(total_size - offset),
                attempt: 1,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_chunks_covers_object() {
        let chunks = plan_chunks(25, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], Chunk { id: 1, offset: 0, size: 10, attempt: 1 });
        assert_eq!(chunks[2], Chunk { id: 3, offset: 20, size: 5, attempt: 1 });
        assert_eq!(chunks.iter().map(|c| c.size).sum::<u64>(), 25);
    }

    #[test]
    fn test_plan_chunks_exact_multiple_and_empty() {
        assert_eq!(plan_chunks(20, 10).len(), 2);
        let empty = plan_chunks(0, 10);
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].size, 0);
    }

    #[test]
    fn test_backoff_doubles() {
        let config = ChunkUploadConfig {
            backoff_unit: Duration::from_millis(10),
            ..Default::default()
        };
        assert_eq!(config.backoff_for(1), Duration::from_millis(20));
        assert_eq!(config.backoff_for(2), Duration::from_millis(40));
        assert_eq!(config.backoff_for(4), Duration::from_millis(160));
    }

    #[test]
    fn test_from_store_config() {
        let store = StoreConfig {
            max_parallel_chunks: 3,
            min_chunk_size: 1024,
            max_chunk_attempts: 2,
            chunk_backoff_ms: 5,
            ..Default::default()
        };
        let config = ChunkUploadConfig::from_store_config(&store);
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.backoff_unit, Duration::from_millis(5));
    }
}
