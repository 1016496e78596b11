//! Process-wide configuration, built once at startup from environment and an optional
//! TOML file, then threaded down through `Arc<Config>` rather than read from a global.

use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

#[derive(Debug, Clone, Parser)]
#[command(name = "vela-core", about = "Branch lifecycle engine")]
pub struct Cli {
    /// Path to an optional TOML config file, merged under the environment.
    #[arg(long, env = "VELA_CONFIG_FILE")]
    pub config_file: Option<String>,

    #[arg(long, env = "VELA_NAMESPACE_PREFIX", default_value = "branch")]
    pub namespace_prefix: String,

    #[arg(long, env = "VELA_RELEASE_NAME", default_value = "vela")]
    pub release_name: String,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "VELA_DEFAULT_SNAPSHOT_CLASS", default_value = "csi-snapclass")]
    pub default_snapshot_class: String,

    #[arg(long, env = "VELA_DEFAULT_STORAGE_CLASS", default_value = "csi-storageclass")]
    pub default_storage_class: String,
}

/// File-based overrides merged under CLI/env values. All fields optional; `None` keeps
/// whatever the CLI/env layer resolved.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub namespace_prefix: Option<String>,
    pub release_name: Option<String>,
    pub default_snapshot_class: Option<String>,
    pub default_storage_class: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub namespace_prefix: String,
    pub release_name: String,
    pub database_url: String,
    pub default_snapshot_class: String,
    pub default_storage_class: String,

    // C1 — Snapshot/Clone Engine
    pub snapshot_poll_interval: Duration,
    pub snapshot_wait_deadline: Duration,

    // C2 — Branch Reconciler
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub creating_error_grace_period: Duration,
    pub starting_error_grace_period: Duration,

    // C3 — Resize Coordinator
    pub resize_event_queue_capacity: usize,
    pub resize_worker_pool_size: usize,
    pub resize_watch_timeout: Duration,
    pub resize_queue_put_timeout: Duration,
    pub resize_initial_backoff: Duration,
    pub resize_max_backoff: Duration,
    pub resize_timeout: Duration,
    pub resize_timeout_sweep_interval: Duration,
    pub cpu_patch_retry_attempts: u32,
    pub cpu_patch_retry_delay: Duration,
    pub memory_slot_size_bytes: i64,
    pub memory_max_slots: i64,

    // C4 — Backup Scheduler
    pub backup_tick_interval: Duration,

    // C5 — Quota Engine
    pub system_default_per_branch: u64,
}

impl Config {
    pub fn load(cli: Cli) -> crate::error::Result<Self> {
        let file_cfg = match &cli.config_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                toml::from_str::<FileConfig>(&contents)
                    .map_err(|e| crate::error::OperationError::Config(e.to_string()))?
            }
            None => FileConfig::default(),
        };

        Ok(Config {
            namespace_prefix: file_cfg.namespace_prefix.unwrap_or(cli.namespace_prefix),
            release_name: file_cfg.release_name.unwrap_or(cli.release_name),
            database_url: cli.database_url,
            default_snapshot_class: file_cfg
                .default_snapshot_class
                .unwrap_or(cli.default_snapshot_class),
            default_storage_class: file_cfg
                .default_storage_class
                .unwrap_or(cli.default_storage_class),

            snapshot_poll_interval: Duration::from_secs(2),
            snapshot_wait_deadline: Duration::from_secs(600),

            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            creating_error_grace_period: Duration::from_secs(300),
            starting_error_grace_period: Duration::from_secs(300),

            resize_event_queue_capacity: 2048,
            resize_worker_pool_size: 4,
            resize_watch_timeout: Duration::from_secs(60),
            resize_queue_put_timeout: Duration::from_secs(2),
            resize_initial_backoff: Duration::from_secs(5),
            resize_max_backoff: Duration::from_secs(60),
            resize_timeout: Duration::from_secs(180),
            resize_timeout_sweep_interval: Duration::from_secs(15),
            cpu_patch_retry_attempts: 10,
            cpu_patch_retry_delay: Duration::from_secs(2),
            memory_slot_size_bytes: 128 * 1024 * 1024,
            memory_max_slots: 2048,

            backup_tick_interval: Duration::from_secs(60),

            system_default_per_branch: 32_000,
        })
    }

    /// Namespace a branch's resources live under: `<prefix>-<branch id>`.
    ///
    /// The branch ID is lowercased: `ulid`'s `Display` renders uppercase Crockford
    /// base32, but namespace names are restricted to `[a-z0-9-]`.
    pub fn branch_namespace(&self, branch_id: &crate::ids::BranchId) -> String {
        format!("{}-{}", self.namespace_prefix, branch_id.to_string().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_overrides_defaults() {
        let cli = Cli {
            config_file: None,
            namespace_prefix: "branch".into(),
            release_name: "vela".into(),
            database_url: "postgres://localhost/vela".into(),
            default_snapshot_class: "csi-snapclass".into(),
            default_storage_class: "csi-storageclass".into(),
        };
        let cfg = Config::load(cli).unwrap();
        assert_eq!(cfg.resize_worker_pool_size, 4);
        assert_eq!(cfg.resize_event_queue_capacity, 2048);
    }
}
