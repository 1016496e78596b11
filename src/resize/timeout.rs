//! Periodic sweep that fails resize entries stuck past the timeout window.
//!
//! Grounded in `enforce_resize_timeouts` (original_source/src/deployment/monitors/
//! resize/memory_resize.py): any entry still PENDING/RESIZING/FILESYSTEM_RESIZE_PENDING
//! whose `requested_at` is older than the timeout is marked FAILED.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::models::{BranchResizeStatus, ResizeService, ResizeStatusEntry};
use crate::db::repo::BranchRepo;

use super::status;

const TIMEOUT_STATUSES: [BranchResizeStatus; 3] =
    [BranchResizeStatus::Pending, BranchResizeStatus::Resizing, BranchResizeStatus::FilesystemResizePending];

/// Apply the timeout rule to one branch's status map in place. Returns true if
/// anything changed.
pub fn sweep_statuses(
    statuses: &mut std::collections::HashMap<String, ResizeStatusEntry>,
    now: chrono::DateTime<Utc>,
    timeout: Duration,
) -> bool {
    let cutoff = now - chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());
    let mut changed = false;
    for entry in statuses.values_mut() {
        if TIMEOUT_STATUSES.contains(&entry.status) && entry.requested_at < cutoff {
            entry.status = BranchResizeStatus::Failed;
            entry.timestamp = now;
            changed = true;
        }
    }
    changed
}

pub async fn run_timeout_sweeper<R: BranchRepo + 'static>(
    branches: Arc<R>,
    sweep_interval: Duration,
    resize_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("resize timeout sweeper shutting down");
                return;
            }
            _ = tokio::time::sleep(sweep_interval) => {}
        }

        if let Err(e) = sweep_once(&branches, resize_timeout).await {
            warn!("resize timeout sweep failed: {e}");
        }
    }
}

async fn sweep_once<R: BranchRepo>(branches: &Arc<R>, resize_timeout: Duration) -> crate::error::Result<()> {
    let now = Utc::now();
    for branch in branches.list_with_resize_statuses().await? {
        let mut statuses = branch.resize_statuses.0.clone();
        if sweep_statuses(&mut statuses, now, resize_timeout) {
            branches.update_resize_statuses(branch.id, statuses.clone()).await?;
            let (aggregate, _) = status::aggregate(&statuses);
            if aggregate == BranchResizeStatus::Failed {
                info!(branch = %branch.id, "resize timed out, marking FAILED");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ResizeStatusEntry;
    use std::collections::HashMap;

    #[test]
    fn pending_entry_past_cutoff_is_failed() {
        let mut statuses = HashMap::new();
        let now = Utc::now();
        statuses.insert(
            status::service_key(ResizeService::DatabaseCpuResize).to_string(),
            ResizeStatusEntry { status: BranchResizeStatus::Pending, timestamp: now, requested_at: now - chrono::Duration::seconds(200) },
        );
        let changed = sweep_statuses(&mut statuses, now, Duration::from_secs(180));
        assert!(changed);
        assert_eq!(statuses.values().next().unwrap().status, BranchResizeStatus::Failed);
    }

    #[test]
    fn pending_entry_within_window_is_untouched() {
        let mut statuses = HashMap::new();
        let now = Utc::now();
        statuses.insert(
            status::service_key(ResizeService::DatabaseCpuResize).to_string(),
            ResizeStatusEntry { status: BranchResizeStatus::Pending, timestamp: now, requested_at: now - chrono::Duration::seconds(10) },
        );
        let changed = sweep_statuses(&mut statuses, now, Duration::from_secs(180));
        assert!(!changed);
    }

    #[test]
    fn completed_entries_are_never_touched() {
        let mut statuses = HashMap::new();
        let now = Utc::now();
        statuses.insert(
            status::service_key(ResizeService::DatabaseCpuResize).to_string(),
            ResizeStatusEntry { status: BranchResizeStatus::Completed, timestamp: now, requested_at: now - chrono::Duration::seconds(600) },
        );
        let changed = sweep_statuses(&mut statuses, now, Duration::from_secs(180));
        assert!(!changed);
    }
}
