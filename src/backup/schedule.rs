//! Tick logic for C4: schedule resolution, due-backup execution, and retention pruning.
//!
//! Grounded in `BackupMonitor.run_once`/`process_branch`/`prune_backups`
//! (original_source/src/api/backupmonitor.py). The Python original used a plain
//! `asyncio.Lock` dict keyed by branch id to serialize concurrent ticks on the same
//! branch while letting other branches proceed; this keeps that shape with
//! `tokio::sync::Mutex`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::Client;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::db::models::{BackupEntry, BackupLog, BackupLogAction, BackupSchedule, BackupScheduleRow};
use crate::db::repo::{BackupRepo, BranchRepo, OrganizationRepo, ProjectRepo};
use crate::error::Result;
use crate::ids::BranchId;
use crate::snapshot::{self, CloneTimeouts};

/// Seconds per unit in a `BackupScheduleRow.unit` string. Mirrors `UNIT_MULTIPLIER`.
fn unit_seconds(unit: &str) -> Option<i64> {
    match unit.to_lowercase().as_str() {
        "min" | "minute" | "minutes" => Some(60),
        "h" | "hour" | "hours" => Some(3600),
        "d" | "day" | "days" => Some(86400),
        "w" | "week" | "weeks" => Some(604800),
        _ => None,
    }
}

/// Maximum `interval` allowed for a given unit, per the schedule-row validation rules.
pub fn max_interval_for_unit(unit: &str) -> Option<i32> {
    match unit.to_lowercase().as_str() {
        "min" | "minute" | "minutes" => Some(59),
        "h" | "hour" | "hours" => Some(23),
        "d" | "day" | "days" => Some(6),
        "w" | "week" | "weeks" => Some(12),
        _ => None,
    }
}

pub const MAX_ROWS_PER_SCHEDULE: usize = 10;

/// The row index manual (on-demand) backups are recorded under. These bypass
/// per-row retention but still count toward the per-branch global cap.
pub const MANUAL_ROW_INDEX: i32 = -1;

fn interval_seconds(row: &BackupScheduleRow) -> i64 {
    unit_seconds(&row.unit).unwrap_or(0) * row.interval as i64
}

/// Per-branch async locks so concurrent ticks never run two backups for the same
/// branch at once; ticks for other branches are unaffected.
pub struct BranchLocks {
    locks: std::sync::Mutex<HashMap<BranchId, Arc<AsyncMutex<()>>>>,
}

impl Default for BranchLocks {
    fn default() -> Self {
        Self { locks: std::sync::Mutex::new(HashMap::new()) }
    }
}

impl BranchLocks {
    fn get(&self, branch: BranchId) -> Arc<AsyncMutex<()>> {
        self.locks.lock().unwrap().entry(branch).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

pub struct BackupTicker<B: BranchRepo, K: BackupRepo, P: ProjectRepo, O: OrganizationRepo> {
    client: Client,
    branches: Arc<B>,
    backups: Arc<K>,
    projects: Arc<P>,
    organizations: Arc<O>,
    config: Arc<crate::config::Config>,
    locks: BranchLocks,
}

impl<B: BranchRepo, K: BackupRepo, P: ProjectRepo, O: OrganizationRepo> BackupTicker<B, K, P, O> {
    pub fn new(
        client: Client,
        branches: Arc<B>,
        backups: Arc<K>,
        projects: Arc<P>,
        organizations: Arc<O>,
        config: Arc<crate::config::Config>,
    ) -> Self {
        Self { client, branches, backups, projects, organizations, config, locks: BranchLocks::default() }
    }

    /// Run-once: one scheduler tick across every ACTIVE_HEALTHY branch.
    pub async fn run_once(&self) -> Result<()> {
        let now = Utc::now();
        let branches = self.branches.list_active_healthy().await?;
        info!(count = branches.len(), "backup tick: found active-healthy branches");

        for branch in branches {
            if let Err(e) = self.process_branch(branch.id, now).await {
                warn!(branch = %branch.id, "backup tick failed for branch: {e}");
            }
        }
        Ok(())
    }

    async fn resolve_schedule(&self, branch: BranchId) -> Result<Option<BackupSchedule>> {
        if let Some(s) = self.backups.schedule_for_branch(branch).await? {
            return Ok(Some(s));
        }
        let project_id = self.branches.project_of(branch).await?;
        let project = self.projects.get(project_id).await?;
        if let Some(env_type) = &project.env_type {
            if let Some(s) = self.backups.schedule_for_org_env(project.organization_id, env_type).await? {
                return Ok(Some(s));
            }
        }
        self.backups.schedule_for_org(project.organization_id).await
    }

    async fn process_branch(&self, branch: BranchId, now: DateTime<Utc>) -> Result<()> {
        let Some(schedule) = self.resolve_schedule(branch).await? else {
            return Ok(());
        };
        let rows = self.backups.rows_for_schedule(schedule.id).await?;

        for row in &rows {
            if self.backups.next_backup(branch, row.row_index).await?.is_none() {
                let next_at = now + chrono::Duration::seconds(interval_seconds(row));
                self.backups.ensure_next_backup(branch, row.row_index, next_at).await?;
            }
        }

        for row in &rows {
            let Some(next) = self.backups.next_backup(branch, row.row_index).await? else { continue };
            if next.next_at > now {
                continue;
            }

            let lock = self.locks.get(branch);
            match lock.try_lock() {
                Ok(_guard) => {
                    if let Err(e) = self.execute_backup(branch, row, now).await {
                        warn!(branch = %branch, row_index = row.row_index, "backup execution failed: {e}");
                    }
                }
                Err(_) => {
                    info!(branch = %branch, row_index = row.row_index, "skipping backup tick, branch locked by another worker");
                }
            }
        }

        self.enforce_global_cap(branch).await
    }

    async fn execute_backup(&self, branch: BranchId, row: &BackupScheduleRow, now: DateTime<Utc>) -> Result<()> {
        let branch_row = self.branches.get(branch).await?;
        let namespace = self.config.branch_namespace(&branch);
        let pvc_name = format!("{}-pvc", branch.to_string().to_lowercase());

        let captured = snapshot::capture_snapshot(
            &self.client,
            branch,
            &namespace,
            &pvc_name,
            &self.config.default_snapshot_class,
            "backup",
            CloneTimeouts::default(),
        )
        .await?;

        let entry = BackupEntry {
            id: 0,
            branch_id: branch,
            row_index: row.row_index,
            created_at: now,
            size_bytes: captured.size_bytes.unwrap_or(branch_row.database_size),
            snapshot_name: captured.name,
            snapshot_namespace: captured.namespace,
        };
        let entry_id = self.backups.insert_entry(entry).await?;
        self.backups
            .append_log(BackupLog {
                branch_id: branch,
                row_index: row.row_index,
                action: BackupLogAction::Taken,
                created_at: now,
                detail: Some(format!("backup_entry={entry_id}")),
            })
            .await?;

        let next_at = now + chrono::Duration::seconds(interval_seconds(row));
        self.backups.advance_next_backup(branch, row.row_index, next_at).await?;
        info!(%branch, row_index = row.row_index, backup = entry_id, "backup created");

        self.prune_row(branch, row).await
    }

    /// Create a manual (on-demand) backup for `branch`, bypassing schedule resolution
    /// and per-row retention. Still subject to the per-branch global cap.
    pub async fn create_manual_backup(&self, branch: BranchId) -> Result<i64> {
        let now = Utc::now();
        let branch_row = self.branches.get(branch).await?;
        let namespace = self.config.branch_namespace(&branch);
        let pvc_name = format!("{}-pvc", branch.to_string().to_lowercase());

        let captured = snapshot::capture_snapshot(
            &self.client,
            branch,
            &namespace,
            &pvc_name,
            &self.config.default_snapshot_class,
            "manual",
            CloneTimeouts::default(),
        )
        .await?;

        let entry = BackupEntry {
            id: 0,
            branch_id: branch,
            row_index: MANUAL_ROW_INDEX,
            created_at: now,
            size_bytes: captured.size_bytes.unwrap_or(branch_row.database_size),
            snapshot_name: captured.name,
            snapshot_namespace: captured.namespace,
        };
        let entry_id = self.backups.insert_entry(entry).await?;
        self.backups
            .append_log(BackupLog {
                branch_id: branch,
                row_index: MANUAL_ROW_INDEX,
                action: BackupLogAction::ManualCreate,
                created_at: now,
                detail: Some(format!("manual backup_entry={entry_id}")),
            })
            .await?;

        self.enforce_global_cap(branch).await?;
        Ok(entry_id)
    }

    async fn prune_row(&self, branch: BranchId, row: &BackupScheduleRow) -> Result<()> {
        let entries = self.backups.entries_for_row(branch, row.row_index).await?;
        if entries.len() <= row.retention as usize {
            return Ok(());
        }
        let overflow = entries.len() - row.retention as usize;
        for entry in &entries[..overflow] {
            self.delete_entry_with_snapshot(branch, entry).await?;
        }
        info!(%branch, row_index = row.row_index, pruned = overflow, "pruned old backups");
        Ok(())
    }

    async fn enforce_global_cap(&self, branch: BranchId) -> Result<()> {
        let project_id = self.branches.project_of(branch).await?;
        let project = self.projects.get(project_id).await?;
        let organization = self.organizations.get(project.organization_id).await?;

        let project_cap = project.max_backups.unwrap_or(i64::MAX);
        let org_cap = organization.max_backups.unwrap_or(i64::MAX);
        let cap = project_cap.min(org_cap);
        if cap == i64::MAX {
            return Ok(());
        }

        let entries = self.backups.entries_for_branch(branch).await?;
        if (entries.len() as i64) <= cap {
            return Ok(());
        }
        let overflow = (entries.len() as i64 - cap) as usize;
        for entry in &entries[..overflow] {
            self.delete_entry_with_snapshot(branch, entry).await?;
        }
        info!(%branch, pruned = overflow, cap, "enforced global backup cap");
        Ok(())
    }

    async fn delete_entry_with_snapshot(&self, branch: BranchId, entry: &BackupEntry) -> Result<()> {
        if let Err(e) = snapshot::delete_snapshot(&self.client, &entry.snapshot_namespace, &entry.snapshot_name).await {
            warn!(%branch, snapshot = %entry.snapshot_name, "best-effort snapshot deletion failed: {e}");
        }
        self.backups.delete_entry(entry.id).await?;
        self.backups
            .append_log(BackupLog {
                branch_id: branch,
                row_index: entry.row_index,
                action: BackupLogAction::Delete,
                created_at: Utc::now(),
                detail: Some(format!("backup_entry={}", entry.id)),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_seconds_matches_known_units() {
        assert_eq!(unit_seconds("min"), Some(60));
        assert_eq!(unit_seconds("H"), Some(3600));
        assert_eq!(unit_seconds("days"), Some(86400));
        assert_eq!(unit_seconds("week"), Some(604800));
        assert_eq!(unit_seconds("bogus"), None);
    }

    #[test]
    fn max_interval_enforces_limits_per_unit() {
        assert_eq!(max_interval_for_unit("min"), Some(59));
        assert_eq!(max_interval_for_unit("h"), Some(23));
        assert_eq!(max_interval_for_unit("d"), Some(6));
        assert_eq!(max_interval_for_unit("w"), Some(12));
    }

    #[test]
    fn interval_seconds_multiplies_unit_by_count() {
        let row = BackupScheduleRow {
            schedule_id: crate::ids::BackupScheduleId::new(),
            row_index: 0,
            interval: 4,
            unit: "h".to_string(),
            retention: 7,
        };
        assert_eq!(interval_seconds(&row), 4 * 3600);
    }
}
