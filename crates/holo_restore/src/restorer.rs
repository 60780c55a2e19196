//! Restore orchestration: plan, split, ingest.
//!
//! `RestoreClient::restore_tables` runs the three stages strictly in order
//! while placement rules for the restored tables are held. Placement rules
//! are reset on every exit path once they were set, including a panic
//! unwinding out of a stage; a failed reset is only logged.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::TableCheckpoints;
use crate::config::RestoreConfig;
use crate::planner::sort_and_validate_file_ranges;
use crate::progress::{OnProgress, ProgressSink};
use crate::split::{RegionSplitter, SplitClient};
use crate::types::{BackupFile, BatchBackupFileSet, CreatedTable};

/// SST download and ingestion on the destination.
#[async_trait]
pub trait SstRestorer: Send + Sync + 'static {
    /// Start ingesting `batches` in order; may return before the work is
    /// done. `on_progress` receives one unit per ingested file.
    async fn go_restore(
        &self,
        cancel: &CancellationToken,
        on_progress: OnProgress,
        batches: Vec<BatchBackupFileSet>,
    ) -> anyhow::Result<()>;

    /// Wait for all work started by `go_restore`.
    async fn wait_until_finish(&self, cancel: &CancellationToken) -> anyhow::Result<()>;
}

/// Cluster placement rules for tables under restore.
#[async_trait]
pub trait PlacementRuleManager: Send + Sync + 'static {
    async fn set_placement_rules(
        &self,
        cancel: &CancellationToken,
        tables: &[CreatedTable],
    ) -> anyhow::Result<()>;

    async fn reset_placement_rules(&self, cancel: &CancellationToken) -> anyhow::Result<()>;
}

/// Orchestrator stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RestoreStage {
    MergeRanges,
    SplitRegions,
    RestoreFiles,
}

impl RestoreStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RestoreStage::MergeRanges => "merge ranges",
            RestoreStage::SplitRegions => "split regions",
            RestoreStage::RestoreFiles => "restore files",
        }
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root error of a restore aborted through its cancellation token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreCancelled;

impl fmt::Display for RestoreCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("restore cancelled")
    }
}

impl std::error::Error for RestoreCancelled {}

/// Context attached to a failed restore: where it failed and how long the
/// stages before it took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: RestoreStage,
    pub completed: Vec<(RestoreStage, Duration)>,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "restore failed at stage '{}'", self.stage)?;
        if !self.completed.is_empty() {
            f.write_str(" after")?;
            for (idx, (stage, took)) in self.completed.iter().enumerate() {
                let sep = if idx == 0 { " " } else { ", " };
                write!(f, "{sep}{stage} ({took:?})")?;
            }
        }
        Ok(())
    }
}

/// Outcome of a successful restore.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub split_keys: usize,
    pub batches: usize,
    pub stage_durations: Vec<(RestoreStage, Duration)>,
}

/// Restore orchestrator over the split and ingestion collaborators.
pub struct RestoreClient {
    splitter: RegionSplitter,
    restorer: Arc<dyn SstRestorer>,
    cfg: RestoreConfig,
}

impl RestoreClient {
    pub fn new(
        split_client: Arc<dyn SplitClient>,
        restorer: Arc<dyn SstRestorer>,
        cfg: RestoreConfig,
    ) -> Self {
        Self {
            splitter: RegionSplitter::new(
                split_client,
                cfg.max_split_keys_once,
                cfg.split_concurrency,
            ),
            restorer,
            cfg,
        }
    }

    pub fn config(&self) -> &RestoreConfig {
        &self.cfg
    }

    /// Restore `all_files` into `created_tables`.
    ///
    /// Inputs:
    /// - `placement`: placement rules held for the duration of the restore.
    /// - `checkpoints`: ranges already ingested by an earlier attempt.
    /// - `progress`: one unit per split key and per ingested or skipped file.
    ///
    /// Output:
    /// - `RestoreReport` on success.
    /// - Error carrying a `StageFailure` context otherwise; cancellation
    ///   surfaces as a `RestoreCancelled` root cause.
    pub async fn restore_tables(
        &self,
        cancel: &CancellationToken,
        placement: &dyn PlacementRuleManager,
        created_tables: &[CreatedTable],
        all_files: &[BackupFile],
        checkpoints: &TableCheckpoints,
        progress: &ProgressSink,
    ) -> anyhow::Result<RestoreReport> {
        placement
            .set_placement_rules(cancel, created_tables)
            .await
            .context("set placement rules")?;

        let outcome = AssertUnwindSafe(self.run_stages(
            cancel,
            created_tables,
            all_files,
            checkpoints,
            progress,
        ))
        .catch_unwind()
        .await;

        // A cancelled restore still has to give the rules back.
        if let Err(err) = placement
            .reset_placement_rules(&CancellationToken::new())
            .await
        {
            tracing::warn!(error = ?err, "failed to reset placement rules");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_stages(
        &self,
        cancel: &CancellationToken,
        created_tables: &[CreatedTable],
        all_files: &[BackupFile],
        checkpoints: &TableCheckpoints,
        progress: &ProgressSink,
    ) -> anyhow::Result<RestoreReport> {
        let mut completed = Vec::with_capacity(3);

        let stage = RestoreStage::MergeRanges;
        let start = Instant::now();
        let plan = check_cancelled(cancel)
            .and_then(|()| {
                sort_and_validate_file_ranges(
                    created_tables,
                    all_files,
                    checkpoints,
                    &self.cfg,
                    progress,
                )
            })
            .with_context(|| stage_failure(stage, &completed))?;
        finish_stage(&mut completed, stage, start);

        let stage = RestoreStage::SplitRegions;
        let start = Instant::now();
        let split_keys = plan.split_keys.len();
        self.split_points(cancel, plan.split_keys, progress)
            .await
            .with_context(|| stage_failure(stage, &completed))?;
        finish_stage(&mut completed, stage, start);

        let stage = RestoreStage::RestoreFiles;
        let start = Instant::now();
        let batches = plan.batches.len();
        let (ingest_kvs, ingest_bytes) = batch_totals(&plan.batches);
        self.restore_sst_files(cancel, plan.batches, progress)
            .await
            .with_context(|| stage_failure(stage, &completed))?;
        finish_stage(&mut completed, stage, start);

        progress.record_ingested(ingest_kvs, ingest_bytes);
        progress.record_restored_files(all_files.len() as u64, start.elapsed());
        let summary = progress.summary();
        tracing::info!(
            files = all_files.len(),
            split_keys,
            batches,
            total_kvs = summary.total_kvs,
            total_bytes = summary.total_bytes,
            skipped_files = summary.skipped_files_by_checkpoint,
            skipped_kvs = summary.skipped_kvs_by_checkpoint,
            skipped_bytes = summary.skipped_bytes_by_checkpoint,
            take = ?summary.restore_files_elapsed,
            "restore files"
        );

        Ok(RestoreReport {
            split_keys,
            batches,
            stage_durations: completed,
        })
    }

    /// Split and scatter at every key of `split_keys`; one progress unit per
    /// key.
    pub async fn split_points(
        &self,
        cancel: &CancellationToken,
        split_keys: Vec<Vec<u8>>,
        progress: &ProgressSink,
    ) -> anyhow::Result<()> {
        self.splitter
            .execute_sorted_keys(cancel, split_keys, &|keys| progress.inc(keys as u64))
            .await
            .context("split and scatter regions")
    }

    /// Ingest `batches` and wait for the ingestion to drain.
    ///
    /// The wait runs even when `cancel` fires or `go_restore` fails, so no
    /// ingestion worker outlives this call.
    pub async fn restore_sst_files(
        &self,
        cancel: &CancellationToken,
        batches: Vec<BatchBackupFileSet>,
        progress: &ProgressSink,
    ) -> anyhow::Result<()> {
        let started = self
            .restorer
            .go_restore(cancel, progress.callback(), batches)
            .await
            .context("start restoring sst files");
        let drained = self
            .restorer
            .wait_until_finish(cancel)
            .await
            .context("wait for sst restore");
        check_cancelled(cancel)?;
        started?;
        drained
    }
}

fn check_cancelled(cancel: &CancellationToken) -> anyhow::Result<()> {
    if cancel.is_cancelled() {
        return Err(RestoreCancelled.into());
    }
    Ok(())
}

fn stage_failure(stage: RestoreStage, completed: &[(RestoreStage, Duration)]) -> StageFailure {
    StageFailure {
        stage,
        completed: completed.to_vec(),
    }
}

fn finish_stage(completed: &mut Vec<(RestoreStage, Duration)>, stage: RestoreStage, start: Instant) {
    let take = start.elapsed();
    tracing::info!(stage = %stage, take = ?take, "Restore Stage Duration");
    completed.push((stage, take));
}

fn batch_totals(batches: &[BatchBackupFileSet]) -> (u64, u64) {
    batches
        .iter()
        .flat_map(|batch| batch.iter())
        .flat_map(|set| set.sst_files.iter())
        .fold((0u64, 0u64), |(kvs, bytes), file| {
            (
                kvs.saturating_add(file.total_kvs),
                bytes.saturating_add(file.total_bytes),
            )
        })
}
