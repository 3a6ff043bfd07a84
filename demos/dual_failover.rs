// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dual-endpoint failover walkthrough.
//!
//! Demonstrates:
//! 1. Resolving a dual store whose primary always fails
//! 2. Saving snapshots that fail over to the secondary
//! 3. Listing and fetching through the surviving endpoint
//! 4. Displaying the recorded metrics
//!
//! Runs entirely in-process, no backends needed.
//!
//! # Run
//!
//! ```bash
//! cargo run --example dual_failover
//! ```

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use snapstore::config::SecondaryConfig;
use snapstore::{Provider, Snapshot, SnapshotKind, StoreConfig, StoreResolver};
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Resolve primary (always failing) + secondary (in-memory)
    // ─────────────────────────────────────────────────────────────────────────
    let temp = tempfile::tempdir()?;
    let config = StoreConfig {
        provider: Provider::FakeFailed,
        temp_dir: temp.path().to_path_buf(),
        failover_threshold: 3,
        secondary: Some(SecondaryConfig {
            provider: Provider::Memory,
            ..Default::default()
        }),
        ..Default::default()
    };

    let resolved = StoreResolver::default().resolve_resilient(&config).await?;
    println!("📦 Resolved store: {}", resolved.shape);
    let store = resolved.store;

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Save a few snapshots; each one fails over to the secondary
    // ─────────────────────────────────────────────────────────────────────────
    for (i, rev) in [100u64, 200, 300, 400].into_iter().enumerate() {
        let kind = if i == 0 { SnapshotKind::Full } else { SnapshotKind::Incremental };
        let snap = Snapshot::new(kind, if i == 0 { 0 } else { rev - 99 }, rev);
        let body = format!("revisions up to {rev}").into_bytes();
        store.save(&snap, Box::new(std::io::Cursor::new(body))).await?;
        println!("   ✓ saved {}", snap);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. List and read back
    // ─────────────────────────────────────────────────────────────────────────
    let list = store.list(false).await?;
    println!("\n📋 {} snapshots listed", list.len());
    if let Some(full) = list.latest_full() {
        let mut body = String::new();
        store.fetch(full).await?.read_to_string(&mut body).await?;
        println!("   latest full {} -> {:?}", full, body);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    dump_metrics(&snapshotter);
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    println!("\n📊 Metrics");
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(key, _, _, value)| {
            let labels: Vec<String> = key
                .key()
                .labels()
                .map(|l| format!("{}={}", l.key(), l.value()))
                .collect();
            let value = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => v.into_inner().to_string(),
                DebugValue::Histogram(samples) => format!("{} samples", samples.len()),
            };
            format!("   {}{{{}}} = {}", key.key().name(), labels.join(","), value)
        })
        .collect();
    lines.sort();
    for line in lines {
        println!("{line}");
    }
}
