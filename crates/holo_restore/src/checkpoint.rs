//! Checkpoint filtering of already-ingested backup files.
//!
//! A checkpoint records, per restored table, the range keys whose files were
//! ingested by an earlier attempt. The store that persists checkpoints is
//! owned by the caller; this module only reads it.

use std::collections::{HashMap, HashSet};

use crate::progress::ProgressSink;
use crate::types::BackupFile;

/// Range keys already ingested for one restored table.
pub type CheckpointSet = HashSet<String>;

/// Checkpoint sets keyed by new physical table id.
pub type TableCheckpoints = HashMap<i64, CheckpointSet>;

/// Derive the checkpoint range key of a backup file name.
///
/// Data files are named `{store_id}_{region_id}_{epoch_version}_{key}_{ts}_{cf}.sst`;
/// the range key drops the trailing `_{cf}.sst` so that the write and default
/// CF files of one range share a key.
///
/// Panics on a name without `_`: such a name cannot come from a valid backup.
pub fn file_range_key(name: &str) -> &str {
    match name.rfind('_') {
        Some(idx) => &name[..idx],
        None => {
            tracing::error!(file = name, "invalid backup data file name");
            panic!("invalid backup data file name: '{name}'");
        }
    }
}

/// Drop files whose range is recorded in `checkpoint`.
///
/// Inputs:
/// - `checkpoint`: ranges ingested by a previous attempt, if any.
/// - `files`: files of one merged range.
/// - `progress`: receives one unit per skipped file plus skipped totals.
///
/// Output:
/// - The files that still need ingestion, in input order.
pub fn filter_out_files(
    checkpoint: Option<&CheckpointSet>,
    files: &[BackupFile],
    progress: &ProgressSink,
) -> Vec<BackupFile> {
    let mut skipped = 0u64;
    let mut skipped_kvs = 0u64;
    let mut skipped_bytes = 0u64;
    let mut remaining = Vec::with_capacity(files.len());
    for file in files {
        let range_key = file_range_key(&file.name);
        if checkpoint.is_some_and(|set| set.contains(range_key)) {
            skipped += 1;
            skipped_kvs = skipped_kvs.saturating_add(file.total_kvs);
            skipped_bytes = skipped_bytes.saturating_add(file.total_bytes);
        } else {
            remaining.push(file.clone());
        }
    }
    if skipped > 0 {
        // (split/scatter + download/ingest) / (default cf + write cf):
        // one unit per skipped file.
        progress.inc(skipped);
        progress.record_checkpoint_skip(skipped, skipped_kvs, skipped_bytes);
    }
    remaining
}
