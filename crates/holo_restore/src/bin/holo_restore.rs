//! Offline restore planner: shows where a restore would split and what it
//! would ingest in which batch, without touching a cluster.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use holo_restore::codec::{format_key, hex_encode};
use holo_restore::meta::{load_backup_meta, load_checkpoints};
use holo_restore::{sort_and_validate_file_ranges, ProgressSink, RestoreArgs, RestorePlan};

#[derive(Parser, Debug)]
#[command(name = "holo-restore")]
#[command(about = "Snapshot restore tooling for HoloStore", long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan split keys and ingestion batches for a backup (dry run).
    Plan(PlanArgs),
}

#[derive(Parser, Debug)]
struct PlanArgs {
    /// Backup metadata JSON (tables and files).
    #[arg(long)]
    meta: PathBuf,

    /// Checkpoint JSON of a previous attempt.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Print the plan as JSON instead of tables.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    restore: RestoreArgs,
}

#[derive(Serialize)]
struct PlanView {
    split_keys: Vec<String>,
    batches: Vec<Vec<FileSetView>>,
    skipped_files: u64,
    skipped_bytes: u64,
}

#[derive(Serialize)]
struct FileSetView {
    table_id: i64,
    files: Vec<String>,
    total_kvs: u64,
    total_bytes: u64,
}

fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Plan(args) => run_plan(args),
    }
}

fn run_plan(args: PlanArgs) -> anyhow::Result<()> {
    let cfg = args.restore.into_config()?;
    let meta = load_backup_meta(&args.meta)?;
    let created_tables = meta.created_tables()?;
    let checkpoints = match &args.checkpoint {
        Some(path) => load_checkpoints(path)?,
        None => Default::default(),
    };

    let progress = ProgressSink::new();
    let plan = sort_and_validate_file_ranges(
        &created_tables,
        &meta.files,
        &checkpoints,
        &cfg,
        &progress,
    )
    .context("plan restore")?;
    let summary = progress.summary();
    let view = plan_view(
        &plan,
        summary.skipped_files_by_checkpoint,
        summary.skipped_bytes_by_checkpoint,
    );

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&view).context("encode plan json")?
        );
        return Ok(());
    }

    let key_rows = plan
        .split_keys
        .iter()
        .enumerate()
        .map(|(idx, key)| vec![idx.to_string(), format_key(key)])
        .collect::<Vec<_>>();
    print_ascii_table(&["#", "split_key"], &key_rows);

    let batch_rows = view
        .batches
        .iter()
        .enumerate()
        .flat_map(|(idx, batch)| {
            batch.iter().map(move |set| {
                vec![
                    idx.to_string(),
                    set.table_id.to_string(),
                    set.files.len().to_string(),
                    set.total_kvs.to_string(),
                    set.total_bytes.to_string(),
                ]
            })
        })
        .collect::<Vec<_>>();
    print_ascii_table(&["batch", "table_id", "files", "kvs", "bytes"], &batch_rows);
    println!(
        "split_keys={} batches={} files={} skipped_files={} skipped_bytes={}",
        plan.split_keys.len(),
        plan.batches.len(),
        plan.file_count(),
        view.skipped_files,
        view.skipped_bytes
    );
    Ok(())
}

fn plan_view(plan: &RestorePlan, skipped_files: u64, skipped_bytes: u64) -> PlanView {
    PlanView {
        split_keys: plan.split_keys.iter().map(|key| hex_encode(key)).collect(),
        batches: plan
            .batches
            .iter()
            .map(|batch| {
                batch
                    .iter()
                    .map(|set| FileSetView {
                        table_id: set.table_id,
                        files: set.sst_files.iter().map(|f| f.name.clone()).collect(),
                        total_kvs: set.sst_files.iter().map(|f| f.total_kvs).sum(),
                        total_bytes: set.sst_files.iter().map(|f| f.total_bytes).sum(),
                    })
                    .collect()
            })
            .collect(),
        skipped_files,
        skipped_bytes,
    }
}

fn print_ascii_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths = headers.iter().map(|h| h.len()).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(cell.len());
        }
    }
    let separator = widths.iter().fold(String::from("+"), |mut s, w| {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
        s
    });

    println!("{separator}");
    let header_line = headers
        .iter()
        .zip(&widths)
        .map(|(h, &w)| format!(" {h:w$} |"))
        .collect::<String>();
    println!("|{header_line}");
    println!("{separator}");
    for row in rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!(" {cell:w$} |"))
            .collect::<String>();
        println!("|{line}");
    }
    println!("{separator}");
}
