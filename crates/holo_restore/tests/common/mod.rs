//! In-memory collaborators and fixtures shared by the restore tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use holo_restore::codec::encode_row_key;
use holo_restore::types::{DEFAULT_CF, WRITE_CF};
use holo_restore::{
    BackupFile, BatchBackupFileSet, CreatedTable, OnProgress, PlacementRuleManager,
    RestoreConfig, RewriteRules, SplitClient, SstRestorer, TableInfo,
};

/// Ordered record of collaborator calls.
#[derive(Default)]
pub struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().expect("call log lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("call log lock").clone()
    }
}

#[derive(Default)]
pub struct FakeSplitClient {
    pub log: Arc<CallLog>,
    pub fail: bool,
    /// Park until the restore is cancelled.
    pub block: bool,
}

#[async_trait]
impl SplitClient for FakeSplitClient {
    async fn split_and_scatter(
        &self,
        cancel: &CancellationToken,
        keys: Vec<Vec<u8>>,
    ) -> anyhow::Result<()> {
        self.log.push(format!("split:{}", keys.len()));
        if self.block {
            cancel.cancelled().await;
        }
        if self.fail {
            anyhow::bail!("region split rejected");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRestorer {
    pub log: Arc<CallLog>,
    pub panic_on_restore: bool,
    pub fail_wait: bool,
}

#[async_trait]
impl SstRestorer for FakeRestorer {
    async fn go_restore(
        &self,
        _cancel: &CancellationToken,
        on_progress: OnProgress,
        batches: Vec<BatchBackupFileSet>,
    ) -> anyhow::Result<()> {
        self.log.push(format!("go_restore:{}", batches.len()));
        if self.panic_on_restore {
            panic!("ingest worker crashed");
        }
        for set in batches.iter().flatten() {
            on_progress(set.sst_files.len() as u64);
        }
        Ok(())
    }

    async fn wait_until_finish(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.log.push("wait");
        if self.fail_wait {
            anyhow::bail!("ingest failed on store 3");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePlacement {
    pub log: Arc<CallLog>,
    pub fail_set: bool,
    pub fail_reset: bool,
}

#[async_trait]
impl PlacementRuleManager for FakePlacement {
    async fn set_placement_rules(
        &self,
        _cancel: &CancellationToken,
        tables: &[CreatedTable],
    ) -> anyhow::Result<()> {
        self.log.push(format!("set:{}", tables.len()));
        if self.fail_set {
            anyhow::bail!("placement driver unavailable");
        }
        Ok(())
    }

    async fn reset_placement_rules(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.log.push(format!("reset:cancelled={}", cancel.is_cancelled()));
        if self.fail_reset {
            anyhow::bail!("placement driver unavailable");
        }
        Ok(())
    }
}

pub fn created_table(old_id: i64, new_id: i64) -> CreatedTable {
    let old = TableInfo {
        id: old_id,
        name: format!("tbl_{old_id}"),
        partitions: Vec::new(),
    };
    let new = TableInfo {
        id: new_id,
        ..old.clone()
    };
    let rules = RewriteRules::for_created_table(&old, &new).expect("rewrite rules");
    CreatedTable {
        table: new,
        old_table: old,
        rewrite_rules: Arc::new(rules),
    }
}

pub fn row_file(table: i64, region: u64, from: i64, to: i64, cf: &str, bytes: u64) -> BackupFile {
    BackupFile {
        name: format!("1_{region}_7_{table}x{from}_42_{cf}.sst"),
        start_key: encode_row_key(table, from),
        end_key: encode_row_key(table, to),
        cf: cf.to_string(),
        total_kvs: 2,
        total_bytes: bytes,
    }
}

/// Tables 100 -> 200 and 101 -> 201. Under a 100-byte threshold the plan
/// has two split keys and two batches.
pub fn two_tables() -> (Vec<CreatedTable>, Vec<BackupFile>) {
    let tables = vec![created_table(100, 200), created_table(101, 201)];
    let files = vec![
        row_file(100, 1, 0, 10, WRITE_CF, 5),
        row_file(100, 1, 0, 10, DEFAULT_CF, 5),
        row_file(100, 2, 10, 20, WRITE_CF, 5),
        row_file(101, 3, 0, 10, WRITE_CF, 60),
        row_file(101, 4, 10, 20, WRITE_CF, 60),
    ];
    (tables, files)
}

pub fn small_config() -> RestoreConfig {
    RestoreConfig {
        split_size_bytes: 100,
        split_key_count: 1_000_000,
        ..RestoreConfig::default()
    }
}
