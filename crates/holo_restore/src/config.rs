//! Restore configuration and its CLI/env binding.

use clap::Args;

/// Default byte threshold of one split group (96 MiB).
pub const DEFAULT_SPLIT_SIZE_BYTES: u64 = 96 * 1024 * 1024;
/// Default key-count threshold of one split group.
pub const DEFAULT_SPLIT_KEY_COUNT: u64 = 960_000;
/// Default number of split keys sent to the split client at once.
pub const DEFAULT_MAX_SPLIT_KEYS_ONCE: usize = 10_240;
/// Default number of split chunks in flight.
pub const DEFAULT_SPLIT_CONCURRENCY: usize = 4;

/// Restore tuning knobs.
///
/// Inputs:
/// - Operator-provided thresholds (or defaults).
///
/// Output:
/// - Immutable snapshot consumed by the planner and the region splitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestoreConfig {
    /// Cut a split group once its accumulated bytes would exceed this.
    pub split_size_bytes: u64,
    /// Cut a split group once its accumulated keys would exceed this.
    pub split_key_count: u64,
    /// Never let two physical tables share a batch or a split group.
    pub split_on_table: bool,
    /// Maximum keys per split/scatter request.
    pub max_split_keys_once: usize,
    /// Maximum split requests in flight; usually store count + 1.
    pub split_concurrency: usize,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            split_size_bytes: DEFAULT_SPLIT_SIZE_BYTES,
            split_key_count: DEFAULT_SPLIT_KEY_COUNT,
            split_on_table: false,
            max_split_keys_once: DEFAULT_MAX_SPLIT_KEYS_ONCE,
            split_concurrency: DEFAULT_SPLIT_CONCURRENCY,
        }
    }
}

/// CLI options for restore tuning.
#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Byte threshold of one split group.
    #[arg(long, env = "HOLO_RESTORE_SPLIT_SIZE_BYTES", default_value_t = DEFAULT_SPLIT_SIZE_BYTES)]
    pub split_size_bytes: u64,

    /// Key-count threshold of one split group.
    #[arg(long, env = "HOLO_RESTORE_SPLIT_KEY_COUNT", default_value_t = DEFAULT_SPLIT_KEY_COUNT)]
    pub split_key_count: u64,

    /// Force a split group and batch boundary after every physical table.
    #[arg(long, env = "HOLO_RESTORE_SPLIT_ON_TABLE", default_value_t = false)]
    pub split_on_table: bool,

    /// Maximum keys per split/scatter request.
    #[arg(
        long,
        env = "HOLO_RESTORE_MAX_SPLIT_KEYS_ONCE",
        default_value_t = DEFAULT_MAX_SPLIT_KEYS_ONCE
    )]
    pub max_split_keys_once: usize,

    /// Maximum split requests in flight.
    ///
    /// Set this to the destination store count + 1.
    #[arg(
        long,
        env = "HOLO_RESTORE_SPLIT_CONCURRENCY",
        default_value_t = DEFAULT_SPLIT_CONCURRENCY
    )]
    pub split_concurrency: usize,
}

impl Default for RestoreArgs {
    fn default() -> Self {
        let cfg = RestoreConfig::default();
        Self {
            split_size_bytes: cfg.split_size_bytes,
            split_key_count: cfg.split_key_count,
            split_on_table: cfg.split_on_table,
            max_split_keys_once: cfg.max_split_keys_once,
            split_concurrency: cfg.split_concurrency,
        }
    }
}

impl RestoreArgs {
    /// Validate the flags and build the config snapshot.
    pub fn into_config(self) -> anyhow::Result<RestoreConfig> {
        anyhow::ensure!(self.split_size_bytes > 0, "--split-size-bytes must be > 0");
        anyhow::ensure!(self.split_key_count > 0, "--split-key-count must be > 0");
        anyhow::ensure!(
            self.max_split_keys_once > 0,
            "--max-split-keys-once must be > 0"
        );
        anyhow::ensure!(
            self.split_concurrency > 0,
            "--split-concurrency must be > 0"
        );
        Ok(RestoreConfig {
            split_size_bytes: self.split_size_bytes,
            split_key_count: self.split_key_count,
            split_on_table: self.split_on_table,
            max_split_keys_once: self.max_split_keys_once,
            split_concurrency: self.split_concurrency,
        })
    }
}
