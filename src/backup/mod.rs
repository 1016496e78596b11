//! C4: Backup Scheduler.
//!
//! Walks every ACTIVE_HEALTHY branch on a fixed cadence, resolves its effective backup
//! schedule, captures due snapshots through C1, and prunes entries past retention or
//! the per-branch global cap.

mod schedule;
mod validate;

pub use schedule::{max_interval_for_unit, BackupTicker, BranchLocks, MANUAL_ROW_INDEX, MAX_ROWS_PER_SCHEDULE};
pub use validate::{validate_retention_budget, validate_schedule_rows};

use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::repo::{BackupRepo, BranchRepo, OrganizationRepo, ProjectRepo};

/// Run the backup tick loop until cancelled.
pub async fn run_backup_scheduler<B, K, P, O>(
    client: Client,
    branches: Arc<B>,
    backups: Arc<K>,
    projects: Arc<P>,
    organizations: Arc<O>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) where
    B: BranchRepo + 'static,
    K: BackupRepo + 'static,
    P: ProjectRepo + 'static,
    O: OrganizationRepo + 'static,
{
    let ticker = BackupTicker::new(client, branches, backups, projects, organizations, config.clone());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("backup scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(config.backup_tick_interval) => {}
        }

        if let Err(e) = ticker.run_once().await {
            warn!("backup tick failed: {e}");
        }
    }
}
