//! Range merging for one table's backup files.
//!
//! Backup files are produced per source region, so a small table can be
//! spread over many tiny files. Before choosing split points the planner
//! coalesces adjacent files into ranges bounded by the split thresholds:
//! 1. group files by start key (write and default CF files of one region
//!    share their bounds),
//! 2. rewrite each group's bounds into the destination keyspace and reject
//!    overlaps,
//! 3. fold adjacent groups left to right while the combined size and key
//!    count stay under the thresholds and both sides hold the same kind of
//!    data (rows, or the same index).

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::codec::{decode_key_head, format_key};
use crate::rewrite::{rewrite_key, RewriteRules};
use crate::types::{BackupFile, MergedRange};

/// Merge statistics for one table, logged by the planner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeRangesStat {
    pub total_files: usize,
    pub total_write_cf_files: usize,
    pub total_default_cf_files: usize,
    pub total_regions: usize,
    pub region_keys_avg: u64,
    pub region_bytes_avg: u64,
    pub merged_regions: usize,
    pub merged_region_keys_avg: u64,
    pub merged_region_bytes_avg: u64,
}

/// Merge and rewrite the files of one table into ordered ranges.
///
/// Inputs:
/// - `files`: every backup file of one (old) physical table.
/// - `rules`: rewrite rules into the restored table.
/// - `split_size_bytes`, `split_key_count`: upper bounds for one range.
///
/// Output:
/// - Ranges sorted by rewritten start key, non-overlapping, with every input
///   file in exactly one range.
/// - Error on unrewritable bounds, overlapping ranges, or files that belong
///   to neither the write nor the default column family.
pub fn merge_and_rewrite_file_ranges(
    files: &[BackupFile],
    rules: &RewriteRules,
    split_size_bytes: u64,
    split_key_count: u64,
) -> anyhow::Result<(Vec<MergedRange>, MergeRangesStat)> {
    if files.is_empty() {
        return Ok((Vec::new(), MergeRangesStat::default()));
    }

    let mut stat = MergeRangesStat {
        total_files: files.len(),
        ..MergeRangesStat::default()
    };
    let mut total_bytes = 0u64;
    let mut total_kvs = 0u64;
    let mut groups = BTreeMap::<&[u8], Vec<&BackupFile>>::new();
    for file in files {
        groups.entry(file.start_key.as_slice()).or_default().push(file);
        if file.is_write_cf() || file.name.contains(crate::types::WRITE_CF) {
            stat.total_write_cf_files += 1;
        } else if file.is_default_cf() || file.name.contains(crate::types::DEFAULT_CF) {
            stat.total_default_cf_files += 1;
        }
        total_bytes = total_bytes.saturating_add(file.total_bytes);
        total_kvs = total_kvs.saturating_add(file.total_kvs);
    }
    if stat.total_write_cf_files == 0 && stat.total_default_cf_files == 0 {
        anyhow::bail!("unknown backup data from neither write CF nor default CF");
    }
    // Raw KV backups carry no write CF.
    stat.total_regions = stat.total_write_cf_files.max(stat.total_default_cf_files);

    let mut tree = BTreeMap::<Vec<u8>, MergedRange>::new();
    for group in groups.into_values() {
        let first = group[0];
        let start_key = rewrite_key(&first.start_key, rules).ok_or_else(|| {
            anyhow::anyhow!(
                "unable to rewrite range start {} of file {}",
                format_key(&first.start_key),
                first.name
            )
        })?;
        let end_key = if first.end_key.is_empty() {
            Vec::new()
        } else {
            rewrite_key(&first.end_key, rules).ok_or_else(|| {
                anyhow::anyhow!(
                    "unable to rewrite range end {} of file {}",
                    format_key(&first.end_key),
                    first.name
                )
            })?
        };
        let range = MergedRange {
            start_key,
            end_key,
            size: group.iter().map(|f| f.total_bytes).sum(),
            count: group.iter().map(|f| f.total_kvs).sum(),
            files: group.into_iter().cloned().collect(),
        };
        if let Some(existing) = overlapping_range(&tree, &range) {
            anyhow::bail!(
                "duplicate range [{}, {}) overlaps [{}, {}) of file {}",
                format_key(&existing.start_key),
                format_key(&existing.end_key),
                format_key(&range.start_key),
                format_key(&range.end_key),
                range.files[0].name
            );
        }
        tree.insert(range.start_key.clone(), range);
    }

    let mut merged = Vec::<MergedRange>::with_capacity(tree.len());
    for range in tree.into_values() {
        match merged.last_mut() {
            Some(left) if needs_merge(left, &range, split_size_bytes, split_key_count) => {
                left.end_key = range.end_key;
                left.size = left.size.saturating_add(range.size);
                left.count = left.count.saturating_add(range.count);
                left.files.extend(range.files);
            }
            _ => merged.push(range),
        }
    }

    let regions = stat.total_regions as u64;
    stat.region_bytes_avg = total_bytes / regions;
    stat.region_keys_avg = total_kvs / regions;
    stat.merged_regions = merged.len();
    stat.merged_region_bytes_avg = total_bytes / merged.len() as u64;
    stat.merged_region_keys_avg = total_kvs / merged.len() as u64;
    Ok((merged, stat))
}

/// Find a range already in `tree` that intersects `range`.
fn overlapping_range<'a>(
    tree: &'a BTreeMap<Vec<u8>, MergedRange>,
    range: &MergedRange,
) -> Option<&'a MergedRange> {
    // Predecessor (start <= new start) overlaps when its end is past our start.
    if let Some((_, prev)) = tree
        .range::<[u8], _>((Bound::Unbounded, Bound::Included(range.start_key.as_slice())))
        .next_back()
    {
        if prev.end_key.is_empty() || prev.end_key.as_slice() > range.start_key.as_slice() {
            return Some(prev);
        }
    }
    // Successor (start > new start) overlaps when it begins before our end.
    if let Some((_, next)) = tree
        .range::<[u8], _>((Bound::Excluded(range.start_key.as_slice()), Bound::Unbounded))
        .next()
    {
        if range.end_key.is_empty() || next.start_key.as_slice() < range.end_key.as_slice() {
            return Some(next);
        }
    }
    None
}

/// Whether `right` should be folded into `left`.
fn needs_merge(
    left: &MergedRange,
    right: &MergedRange,
    split_size_bytes: u64,
    split_key_count: u64,
) -> bool {
    if right.size == 0 {
        return true;
    }
    if left.size.saturating_add(right.size) > split_size_bytes {
        return false;
    }
    if left.count.saturating_add(right.count) > split_key_count {
        return false;
    }
    let (Ok(left_head), Ok(right_head)) = (
        decode_key_head(&left.start_key),
        decode_key_head(&right.start_key),
    ) else {
        return false;
    };
    if left_head.table_id != right_head.table_id {
        return false;
    }
    if left_head.is_record && right_head.is_record {
        return true;
    }
    !left_head.is_record && !right_head.is_record && left_head.index_id == right_head.index_id
}
