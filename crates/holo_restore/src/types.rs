//! Restore data model shared by the planner, the orchestrator and the CLI.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rewrite::RewriteRules;

/// Column family holding MVCC write records.
pub const WRITE_CF: &str = "write";
/// Column family holding large values referenced from the write CF.
pub const DEFAULT_CF: &str = "default";

/// One immutable backup SST file described by backup metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    /// `{store_id}_{region_id}_{epoch_version}_{key}_{ts}_{cf}.sst`
    pub name: String,
    #[serde(with = "crate::codec::hex_bytes")]
    pub start_key: Vec<u8>,
    #[serde(with = "crate::codec::hex_bytes")]
    pub end_key: Vec<u8>,
    pub cf: String,
    #[serde(default)]
    pub total_kvs: u64,
    #[serde(default)]
    pub total_bytes: u64,
}

impl BackupFile {
    pub fn is_write_cf(&self) -> bool {
        self.cf == WRITE_CF
    }

    pub fn is_default_cf(&self) -> bool {
        self.cf == DEFAULT_CF
    }
}

/// One partition definition of a partitioned table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub id: i64,
    pub name: String,
}

/// Schema-level table description; only what the restore path needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub partitions: Vec<PartitionInfo>,
}

/// A table recreated in the destination cluster, paired with its backup
/// description and the key rewrite rules between the two.
#[derive(Clone, Debug)]
pub struct CreatedTable {
    pub table: TableInfo,
    pub old_table: TableInfo,
    pub rewrite_rules: Arc<RewriteRules>,
}

/// One physical keyspace (table or partition) to restore.
#[derive(Clone, Debug)]
pub struct PhysicalTable {
    pub new_physical_id: i64,
    pub old_physical_id: i64,
    pub rewrite_rules: Arc<RewriteRules>,
}

/// Coalesced, rewritten key range of one table built from backup files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedRange {
    pub start_key: Vec<u8>,
    /// Empty means unbounded.
    pub end_key: Vec<u8>,
    pub size: u64,
    pub count: u64,
    pub files: Vec<BackupFile>,
}

/// One table's contribution to an ingestion batch.
#[derive(Clone, Debug)]
pub struct BackupFileSet {
    /// New physical table id.
    pub table_id: i64,
    pub sst_files: Vec<BackupFile>,
    pub rewrite_rules: Arc<RewriteRules>,
}

/// Files ingested together between two split points. Members may belong to
/// different tables unless splitting on table boundaries.
pub type BatchBackupFileSet = Vec<BackupFileSet>;

/// Output of the planner: where to split and what to ingest in which batch.
#[derive(Clone, Debug, Default)]
pub struct RestorePlan {
    /// Strictly ascending.
    pub split_keys: Vec<Vec<u8>>,
    pub batches: Vec<BatchBackupFileSet>,
}

impl RestorePlan {
    /// Number of files that still need to be ingested.
    pub fn file_count(&self) -> usize {
        self.batches
            .iter()
            .flat_map(|batch| batch.iter())
            .map(|set| set.sst_files.len())
            .sum()
    }
}
