//! Snapshot restore into a range-partitioned key-value cluster.
//!
//! A restore turns a set of immutable backup SST files into data served by
//! freshly created tables:
//! 1. the planner merges each table's files into ranges, picks split keys and
//!    groups files into ingestion batches (`planner`),
//! 2. the destination keyspace is split at those keys (`split`),
//! 3. batches are downloaded and ingested (`restorer`).
//!
//! Planning is a pure function of the tables, the files and the thresholds.
//! Checkpoints from an earlier attempt only remove files from batches, so a
//! retried restore splits at exactly the same keys.

pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod merge;
pub mod meta;
pub mod planner;
pub mod progress;
pub mod restorer;
pub mod rewrite;
pub mod split;
pub mod types;

pub use checkpoint::{CheckpointSet, TableCheckpoints};
pub use config::{RestoreArgs, RestoreConfig};
pub use planner::{sort_and_validate_file_ranges, MERGED_RANGE_COUNT_THRESHOLD};
pub use progress::{OnProgress, ProgressSink, RestoreSummarySnapshot};
pub use restorer::{
    PlacementRuleManager, RestoreCancelled, RestoreClient, RestoreReport, RestoreStage,
    SstRestorer, StageFailure,
};
pub use rewrite::{RewriteRule, RewriteRules};
pub use split::{RegionSplitter, SplitClient};
pub use types::{
    BackupFile, BackupFileSet, BatchBackupFileSet, CreatedTable, MergedRange, PhysicalTable,
    RestorePlan, TableInfo,
};
