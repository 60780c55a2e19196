//! Split-key and batch planning for a snapshot restore.
//!
//! Planning walks every restored physical table in new-id order and every
//! merged range of that table in key order, in one pass:
//! - split keys are chosen by accumulating range size/count across tables
//!   and cutting when a threshold would be exceeded,
//! - the files between two cuts form one ingestion batch,
//! - checkpointed files are removed from batches only after the cut
//!   decision for their range was taken.
//!
//! The result depends only on the tables, the backup files and the
//! thresholds. It must not depend on the destination's current region
//! layout or on how far an earlier attempt got: a retried restore has to
//! pick exactly the same split keys, otherwise it would re-split ranges the
//! previous attempt already populated.

use std::collections::HashMap;

use crate::checkpoint::{filter_out_files, TableCheckpoints};
use crate::codec::{decode_table_id, format_key};
use crate::config::RestoreConfig;
use crate::merge::merge_and_rewrite_file_ranges;
use crate::progress::ProgressSink;
use crate::rewrite::{partition_id_map, validate_file_rewrite_rule};
use crate::types::{
    BackupFile, BackupFileSet, BatchBackupFileSet, CreatedTable, MergedRange, PhysicalTable,
    RestorePlan,
};

/// Cap on files folded into one split group.
///
/// Many tables with only a few rows each would otherwise collapse into a
/// single enormous group of tiny ranges.
pub const MERGED_RANGE_COUNT_THRESHOLD: usize = 1536;

/// Expand created tables into physical tables (table + partitions), sorted
/// by new physical id.
pub fn get_sorted_physical_tables(
    created_tables: &[CreatedTable],
) -> anyhow::Result<Vec<PhysicalTable>> {
    let mut physical_tables = Vec::with_capacity(created_tables.len());
    for created in created_tables {
        physical_tables.push(PhysicalTable {
            new_physical_id: created.table.id,
            old_physical_id: created.old_table.id,
            rewrite_rules: created.rewrite_rules.clone(),
        });
        for (old_id, new_id) in partition_id_map(&created.table, &created.old_table)? {
            physical_tables.push(PhysicalTable {
                new_physical_id: new_id,
                old_physical_id: old_id,
                rewrite_rules: created.rewrite_rules.clone(),
            });
        }
    }
    physical_tables.sort_by_key(|table| table.new_physical_id);
    Ok(physical_tables)
}

/// Group backup files by the (old) table id encoded in their keys.
///
/// Output:
/// - Files per table id, in input order.
/// - Number of write-CF files, used as a capacity hint for split keys.
///
/// Panics when a file's keys name two tables or no table: the backup
/// metadata is corrupted and no retry can fix it.
pub fn map_table_to_files(files: &[BackupFile]) -> (HashMap<i64, Vec<BackupFile>>, usize) {
    let mut result = HashMap::<i64, Vec<BackupFile>>::new();
    let mut write_cf_files = 0usize;
    for file in files {
        let table_id = decode_table_id(&file.start_key);
        let table_end_id = decode_table_id(&file.end_key);
        if table_id != table_end_id {
            tracing::error!(
                file = %file.name,
                start_key = %format_key(&file.start_key),
                end_key = %format_key(&file.end_key),
                "key range spread between many files"
            );
            panic!(
                "backup file {} spans tables {table_id} and {table_end_id}",
                file.name
            );
        }
        if table_id == 0 {
            tracing::error!(
                file = %file.name,
                start_key = %format_key(&file.start_key),
                end_key = %format_key(&file.end_key),
                "invalid table key of file"
            );
            panic!("backup file {} has an invalid table key", file.name);
        }
        result.entry(table_id).or_default().push(file.clone());
        if file.is_write_cf() {
            write_cf_files += 1;
        }
    }
    (result, write_cf_files)
}

/// Mutable state of one planning pass.
#[derive(Debug, Default)]
struct PlannerState {
    /// Bytes accumulated since the last split key.
    group_size: u64,
    /// Keys accumulated since the last split key.
    group_count: u64,
    /// Files folded since the last flush, counted before checkpoint filtering.
    merged_file_count: usize,
    /// End key of the latest range; becomes a split key on the next flush.
    last_key: Option<Vec<u8>>,
    current_batch: BatchBackupFileSet,
    split_keys: Vec<Vec<u8>>,
    batches: Vec<BatchBackupFileSet>,
}

impl PlannerState {
    fn with_capacity(hint: usize) -> Self {
        Self {
            split_keys: Vec::with_capacity(hint),
            batches: Vec::with_capacity(hint),
            ..Self::default()
        }
    }

    /// Close the current group and batch.
    ///
    /// `emit_split_key = false` drops the pending split key instead of
    /// emitting it (table boundaries already separate the keyspace).
    fn flush(&mut self, emit_split_key: bool) {
        match self.last_key.take() {
            Some(key) if emit_split_key => self.split_keys.push(key),
            _ => {}
        }
        if !self.current_batch.is_empty() {
            self.batches.push(std::mem::take(&mut self.current_batch));
        }
        self.group_size = 0;
        self.group_count = 0;
        self.merged_file_count = 0;
    }

    fn push_range(
        &mut self,
        table: &PhysicalTable,
        range: MergedRange,
        cfg: &RestoreConfig,
        checkpoints: &TableCheckpoints,
        progress: &ProgressSink,
    ) {
        let merged_size = self.group_size.saturating_add(range.size);
        let merged_count = self.group_count.saturating_add(range.count);
        if merged_size > cfg.split_size_bytes
            || merged_count > cfg.split_key_count
            || self.merged_file_count > MERGED_RANGE_COUNT_THRESHOLD
        {
            tracing::info!(
                merged_kv_size = self.group_size,
                merged_kv_count = self.group_count,
                merged_range_count = self.merged_file_count,
                "merge ranges across tables due to kv size/count or merged count threshold exceeded"
            );
            self.flush(true);
            self.group_size = range.size;
            self.group_count = range.count;
        } else {
            self.group_size = merged_size;
            self.group_count = merged_count;
        }
        // Always the newest candidate; only becomes a split key on flush.
        self.last_key = Some(range.end_key);
        // Count before filtering so that split keys do not depend on how much
        // a previous attempt already restored.
        self.merged_file_count += range.files.len();

        let remaining = filter_out_files(
            checkpoints.get(&table.new_physical_id),
            &range.files,
            progress,
        );
        if remaining.is_empty() {
            return;
        }
        match self.current_batch.last_mut() {
            Some(set) if set.table_id == table.new_physical_id => {
                set.sst_files.extend(remaining);
            }
            _ => self.current_batch.push(BackupFileSet {
                table_id: table.new_physical_id,
                sst_files: remaining,
                rewrite_rules: table.rewrite_rules.clone(),
            }),
        }
    }

    fn finish(mut self) -> RestorePlan {
        if let Some(key) = self.last_key.take() {
            self.split_keys.push(key);
        }
        if !self.current_batch.is_empty() {
            tracing::info!(
                merged_kv_size = self.group_size,
                merged_kv_count = self.group_count,
                merged_range_count = self.merged_file_count,
                "merge ranges across tables due to the last group"
            );
            self.batches.push(std::mem::take(&mut self.current_batch));
        }
        RestorePlan {
            split_keys: self.split_keys,
            batches: self.batches,
        }
    }
}

/// Sort, validate and merge the backup files of all created tables into a
/// restore plan.
///
/// Inputs:
/// - `created_tables`: restored tables with their rewrite rules.
/// - `all_files`: every backup file of the job.
/// - `checkpoints`: ranges already ingested, keyed by new physical id.
/// - `cfg`: split thresholds and the split-on-table switch.
/// - `progress`: receives one unit per checkpoint-skipped file.
///
/// Output:
/// - `RestorePlan` with strictly ascending split keys and the file batches.
/// - Error when a file does not match its table's rewrite rules or its
///   ranges cannot be merged; nothing is retried here.
pub fn sort_and_validate_file_ranges(
    created_tables: &[CreatedTable],
    all_files: &[BackupFile],
    checkpoints: &TableCheckpoints,
    cfg: &RestoreConfig,
    progress: &ProgressSink,
) -> anyhow::Result<RestorePlan> {
    let sorted_physical_tables = get_sorted_physical_tables(created_tables)?;
    let (file_of_table, hint_split_key_count) = map_table_to_files(all_files);
    let mut state = PlannerState::with_capacity(hint_split_key_count);

    tracing::info!(
        kv_size_threshold = cfg.split_size_bytes,
        kv_count_threshold = cfg.split_key_count,
        split_on_table = cfg.split_on_table,
        "start to merge ranges"
    );
    for table in &sorted_physical_tables {
        let files = file_of_table
            .get(&table.old_physical_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for file in files {
            validate_file_rewrite_rule(file, &table.rewrite_rules)?;
        }
        let (sorted_ranges, stat) = merge_and_rewrite_file_ranges(
            files,
            &table.rewrite_rules,
            cfg.split_size_bytes,
            cfg.split_key_count,
        )?;
        tracing::info!(
            new_physical_id = table.new_physical_id,
            old_physical_id = table.old_physical_id,
            files_total = stat.total_files,
            files_write = stat.total_write_cf_files,
            files_default = stat.total_default_cf_files,
            regions_total = stat.total_regions,
            region_keys_avg = stat.region_keys_avg,
            region_bytes_avg = stat.region_bytes_avg,
            merged_regions = stat.merged_regions,
            merged_keys_avg = stat.merged_region_keys_avg,
            merged_bytes_avg = stat.merged_region_bytes_avg,
            "merge and validate file"
        );

        for range in sorted_ranges {
            state.push_range(table, range, cfg, checkpoints, progress);
        }

        if cfg.split_on_table {
            tracing::info!(
                table_id = table.new_physical_id,
                merged_kv_size = state.group_size,
                merged_kv_count = state.group_count,
                merged_range_count = state.merged_file_count,
                "merge ranges across tables due to split on table"
            );
            state.flush(false);
        }
    }
    Ok(state.finish())
}
