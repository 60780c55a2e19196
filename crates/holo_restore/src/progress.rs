//! Restore progress and summary counters.
//!
//! Progress is purely additive and may be reported from many split and
//! ingestion workers at once, so every counter is a relaxed atomic and the
//! sink is cheap to clone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Progress callback handed to collaborators; receives newly completed units.
pub type OnProgress = Arc<dyn Fn(u64) + Send + Sync>;

/// Point-in-time copy of the summary counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreSummarySnapshot {
    pub total_kvs: u64,
    pub total_bytes: u64,
    pub skipped_kvs_by_checkpoint: u64,
    pub skipped_bytes_by_checkpoint: u64,
    pub skipped_files_by_checkpoint: u64,
    pub restored_files: u64,
    pub restore_files_elapsed: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    completed_units: AtomicU64,
    total_kvs: AtomicU64,
    total_bytes: AtomicU64,
    skipped_kvs: AtomicU64,
    skipped_bytes: AtomicU64,
    skipped_files: AtomicU64,
    restored_files: AtomicU64,
    restore_files_elapsed_us: AtomicU64,
}

/// Shared sink for completed units and summary totals.
#[derive(Clone, Default)]
pub struct ProgressSink {
    counters: Arc<Counters>,
    listener: Option<OnProgress>,
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("completed", &self.completed())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

impl ProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every increment to `listener` as well (e.g. a progress bar).
    pub fn with_listener(listener: OnProgress) -> Self {
        Self {
            counters: Arc::default(),
            listener: Some(listener),
        }
    }

    /// Record `units` newly completed units.
    pub fn inc(&self, units: u64) {
        if units == 0 {
            return;
        }
        self.counters
            .completed_units
            .fetch_add(units, Ordering::Relaxed);
        if let Some(listener) = &self.listener {
            listener(units);
        }
    }

    /// Callback view of this sink for collaborators.
    pub fn callback(&self) -> OnProgress {
        let sink = self.clone();
        Arc::new(move |units| sink.inc(units))
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed_units.load(Ordering::Relaxed)
    }

    /// Account files that a previous attempt already ingested.
    ///
    /// Skipped data still counts toward the restore totals so that a resumed
    /// restore reports the same totals as an uninterrupted one.
    pub fn record_checkpoint_skip(&self, files: u64, kvs: u64, bytes: u64) {
        let c = &self.counters;
        c.total_kvs.fetch_add(kvs, Ordering::Relaxed);
        c.skipped_kvs.fetch_add(kvs, Ordering::Relaxed);
        c.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        c.skipped_bytes.fetch_add(bytes, Ordering::Relaxed);
        c.skipped_files.fetch_add(files, Ordering::Relaxed);
    }

    /// Account data written by the ingestion stage.
    pub fn record_ingested(&self, kvs: u64, bytes: u64) {
        self.counters.total_kvs.fetch_add(kvs, Ordering::Relaxed);
        self.counters.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_restored_files(&self, files: u64, elapsed: Duration) {
        let elapsed_us = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        self.counters
            .restored_files
            .fetch_add(files, Ordering::Relaxed);
        self.counters
            .restore_files_elapsed_us
            .fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub fn summary(&self) -> RestoreSummarySnapshot {
        let c = &self.counters;
        RestoreSummarySnapshot {
            total_kvs: c.total_kvs.load(Ordering::Relaxed),
            total_bytes: c.total_bytes.load(Ordering::Relaxed),
            skipped_kvs_by_checkpoint: c.skipped_kvs.load(Ordering::Relaxed),
            skipped_bytes_by_checkpoint: c.skipped_bytes.load(Ordering::Relaxed),
            skipped_files_by_checkpoint: c.skipped_files.load(Ordering::Relaxed),
            restored_files: c.restored_files.load(Ordering::Relaxed),
            restore_files_elapsed: Duration::from_micros(
                c.restore_files_elapsed_us.load(Ordering::Relaxed),
            ),
        }
    }
}
