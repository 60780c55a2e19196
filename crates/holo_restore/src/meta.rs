//! JSON backup metadata and checkpoint files.
//!
//! Metadata:
//! `{"tables": [{"old": TableInfo, "new": TableInfo}], "files": [BackupFile]}`
//! with keys as hex strings. Checkpoints: `{"<new table id>": ["<range key>"]}`.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::checkpoint::TableCheckpoints;
use crate::rewrite::RewriteRules;
use crate::types::{BackupFile, CreatedTable, TableInfo};

/// One backed-up table and the table it is restored into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub old: TableInfo,
    pub new: TableInfo,
}

/// Backup metadata needed to plan a restore.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMeta {
    #[serde(default)]
    pub tables: Vec<TableMapping>,
    #[serde(default)]
    pub files: Vec<BackupFile>,
}

impl BackupMeta {
    pub fn from_json(data: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(data).context("decode backup metadata")
    }

    /// Pair each mapping with its rewrite rules.
    pub fn created_tables(&self) -> anyhow::Result<Vec<CreatedTable>> {
        self.tables
            .iter()
            .map(|mapping| {
                let rules = RewriteRules::for_created_table(&mapping.old, &mapping.new)
                    .with_context(|| {
                        format!(
                            "build rewrite rules for table {} ({} -> {})",
                            mapping.old.name, mapping.old.id, mapping.new.id
                        )
                    })?;
                Ok(CreatedTable {
                    table: mapping.new.clone(),
                    old_table: mapping.old.clone(),
                    rewrite_rules: Arc::new(rules),
                })
            })
            .collect()
    }
}

pub fn load_backup_meta(path: &Path) -> anyhow::Result<BackupMeta> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    BackupMeta::from_json(&data).with_context(|| format!("parse {}", path.display()))
}

pub fn load_checkpoints(path: &Path) -> anyhow::Result<TableCheckpoints> {
    let data = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("parse checkpoint file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::codec::{encode_row_key, hex_encode};

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    #[test]
    fn metadata_round_trips_through_a_file() {
        let start = hex_encode(&encode_row_key(100, 0));
        let end = hex_encode(&encode_row_key(100, 10));
        let json = format!(
            r#"{{
                "tables": [{{
                    "old": {{"id": 100, "name": "orders", "partitions": [{{"id": 101, "name": "p0"}}]}},
                    "new": {{"id": 200, "name": "orders", "partitions": [{{"id": 201, "name": "p0"}}]}}
                }}],
                "files": [{{
                    "name": "1_2_3_abc_4_write.sst",
                    "start_key": "{start}",
                    "end_key": "{end}",
                    "cf": "write",
                    "total_kvs": 10,
                    "total_bytes": 100
                }}]
            }}"#
        );
        let file = write_temp(&json);
        let meta = load_backup_meta(file.path()).expect("load metadata");
        assert_eq!(meta.files.len(), 1);
        assert_eq!(meta.files[0].start_key, encode_row_key(100, 0));
        assert_eq!(meta.files[0].total_bytes, 100);

        let tables = meta.created_tables().expect("created tables");
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table.id, 200);
        assert_eq!(tables[0].old_table.id, 100);
        assert_eq!(tables[0].rewrite_rules.data.len(), 2);
    }

    #[test]
    fn missing_partition_fails_table_build() {
        let meta = BackupMeta::from_json(
            br#"{"tables": [{
                "old": {"id": 1, "name": "t", "partitions": [{"id": 2, "name": "p0"}]},
                "new": {"id": 3, "name": "t"}
            }]}"#,
        )
        .expect("decode");
        let err = meta.created_tables().expect_err("p0 missing");
        assert!(format!("{err:#}").contains("p0"));
    }

    #[test]
    fn checkpoints_are_keyed_by_table_id() {
        let file = write_temp(r#"{"201": ["1_2_3_abc_4", "1_5_3_def_4"], "202": []}"#);
        let checkpoints = load_checkpoints(file.path()).expect("load checkpoints");
        assert_eq!(checkpoints.len(), 2);
        assert!(checkpoints[&201].contains("1_5_3_def_4"));
        assert!(checkpoints[&202].is_empty());
    }

    #[test]
    fn unreadable_files_report_their_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("missing.json");
        let err = load_backup_meta(&path).expect_err("missing file");
        assert!(err.to_string().contains("missing.json"));

        let bad = write_temp("{not json");
        assert!(load_checkpoints(bad.path()).is_err());
    }
}
