//! End-to-end test for `holo-restore plan`.
//!
//! Test flow:
//! 1) Write backup metadata and a checkpoint file into a temp dir.
//! 2) Run the binary with `--json`, once without and once with the
//!    checkpoint.
//!
//! Verification:
//! - Split keys are identical across both runs.
//! - The checkpointed file disappears from its batch and is reported as
//!   skipped.

mod common;

use std::path::Path;
use std::process::Command;

use common::two_tables;
use holo_restore::checkpoint::file_range_key;
use holo_restore::codec::{encode_row_key, hex_encode};
use holo_restore::meta::{BackupMeta, TableMapping};

fn run_plan(meta: &Path, checkpoint: Option<&Path>) -> serde_json::Value {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_holo-restore"));
    cmd.arg("plan")
        .arg("--meta")
        .arg(meta)
        .arg("--json")
        .arg("--split-size-bytes")
        .arg("100")
        .env("RUST_LOG", "warn");
    if let Some(path) = checkpoint {
        cmd.arg("--checkpoint").arg(path);
    }
    let output = cmd.output().expect("run holo-restore");
    assert!(
        output.status.success(),
        "holo-restore failed\nstderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("plan json")
}

#[test]
fn plan_is_stable_across_checkpoints() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (tables, files) = two_tables();
    let meta = BackupMeta {
        tables: tables
            .iter()
            .map(|t| TableMapping {
                old: t.old_table.clone(),
                new: t.table.clone(),
            })
            .collect(),
        files: files.clone(),
    };
    let meta_path = dir.path().join("backupmeta.json");
    std::fs::write(
        &meta_path,
        serde_json::to_vec(&meta).expect("encode metadata"),
    )
    .expect("write metadata");

    let checkpoint_path = dir.path().join("checkpoint.json");
    let checkpoint = serde_json::json!({ "201": [file_range_key(&files[3].name)] });
    std::fs::write(&checkpoint_path, checkpoint.to_string()).expect("write checkpoint");

    let fresh = run_plan(&meta_path, None);
    let resumed = run_plan(&meta_path, Some(&checkpoint_path));

    let expected_keys = serde_json::json!([
        hex_encode(&encode_row_key(201, 10)),
        hex_encode(&encode_row_key(201, 20)),
    ]);
    assert_eq!(fresh["split_keys"], expected_keys);
    assert_eq!(resumed["split_keys"], expected_keys);

    assert_eq!(fresh["skipped_files"], 0);
    assert_eq!(resumed["skipped_files"], 1);
    assert_eq!(resumed["skipped_bytes"], 60);

    let fresh_batches = fresh["batches"].as_array().expect("batches");
    let resumed_batches = resumed["batches"].as_array().expect("batches");
    assert_eq!(fresh_batches.len(), 2);
    assert_eq!(resumed_batches.len(), 2);
    assert_eq!(fresh_batches[0].as_array().expect("batch").len(), 2);
    let first = resumed_batches[0].as_array().expect("batch");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0]["table_id"], 200);
    assert_eq!(resumed_batches[1], fresh_batches[1]);
}

#[test]
fn missing_metadata_fails() {
    let dir = tempfile::tempdir().expect("temp dir");
    let output = Command::new(env!("CARGO_BIN_EXE_holo-restore"))
        .arg("plan")
        .arg("--meta")
        .arg(dir.path().join("nope.json"))
        .output()
        .expect("run holo-restore");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope.json"));
}
