//! Per-service resize status bookkeeping: the key map, the priority lattice, and the
//! aggregate rollup written to `Branch.resize_statuses`.
//!
//! Grounded in `RESIZE_TIMEOUT_SERVICES`/`aggregate_resize_statuses`
//! (original_source/src/deployment/monitors/resize/memory_resize.py +
//! original_source/src/models/branch.py): `BranchResizeStatus` already derives `Ord` in
//! the priority order NONE<PENDING<RESIZING<FILESYSTEM_RESIZE_PENDING<COMPLETED<FAILED
//! (db::models), so the lattice comparison here is just `>`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::db::models::{BranchResizeStatus, ResizeService, ResizeStatusEntry};

pub fn service_key(service: ResizeService) -> &'static str {
    match service {
        ResizeService::DatabaseCpuResize => "database_cpu_resize",
        ResizeService::DatabaseMemoryResize => "database_memory_resize",
        ResizeService::DatabaseIopsResize => "database_iops_resize",
        ResizeService::DatabaseDiskResize => "database_disk_resize",
        ResizeService::StorageApiDiskResize => "storage_api_disk_resize",
    }
}

/// Only move a service's status forward in the lattice; a same-or-lower-priority
/// update (e.g. a stale RESIZING event arriving after COMPLETED) is dropped.
pub fn advances(current: BranchResizeStatus, new: BranchResizeStatus) -> bool {
    new > current
}

pub fn set_pending(
    statuses: &mut HashMap<String, ResizeStatusEntry>,
    service: ResizeService,
    now: DateTime<Utc>,
) {
    statuses.insert(
        service_key(service).to_string(),
        ResizeStatusEntry { status: BranchResizeStatus::Pending, timestamp: now, requested_at: now },
    );
}

pub fn clear(statuses: &mut HashMap<String, ResizeStatusEntry>, service: ResizeService) {
    statuses.remove(service_key(service));
}

/// Advance a service's status if the lattice order permits, preserving `requested_at`.
pub fn advance(
    statuses: &mut HashMap<String, ResizeStatusEntry>,
    service: ResizeService,
    new_status: BranchResizeStatus,
    now: DateTime<Utc>,
) -> bool {
    let key = service_key(service);
    let requested_at = statuses.get(key).map(|e| e.requested_at).unwrap_or(now);
    let current = statuses.get(key).map(|e| e.status).unwrap_or(BranchResizeStatus::None);
    if !advances(current, new_status) {
        return false;
    }
    statuses.insert(key.to_string(), ResizeStatusEntry { status: new_status, timestamp: now, requested_at });
    true
}

/// Roll the per-service map up to one overall status, breaking ties between entries at
/// the same (maximum) priority by the most recent timestamp.
pub fn aggregate(statuses: &HashMap<String, ResizeStatusEntry>) -> (BranchResizeStatus, Option<DateTime<Utc>>) {
    let max_status = statuses.values().map(|e| e.status).max().unwrap_or(BranchResizeStatus::None);
    let ts = statuses.values().filter(|e| e.status == max_status).map(|e| e.timestamp).max();
    (max_status, ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_rejects_regression() {
        let mut statuses = HashMap::new();
        let now = Utc::now();
        advance(&mut statuses, ResizeService::DatabaseCpuResize, BranchResizeStatus::Completed, now);
        let advanced = advance(&mut statuses, ResizeService::DatabaseCpuResize, BranchResizeStatus::Resizing, now);
        assert!(!advanced);
        assert_eq!(statuses["database_cpu_resize"].status, BranchResizeStatus::Completed);
    }

    #[test]
    fn aggregate_takes_the_highest_priority_entry() {
        let mut statuses = HashMap::new();
        let now = Utc::now();
        statuses.insert(
            "database_cpu_resize".to_string(),
            ResizeStatusEntry { status: BranchResizeStatus::Pending, timestamp: now, requested_at: now },
        );
        statuses.insert(
            "database_disk_resize".to_string(),
            ResizeStatusEntry { status: BranchResizeStatus::Failed, timestamp: now, requested_at: now },
        );
        let (status, _) = aggregate(&statuses);
        assert_eq!(status, BranchResizeStatus::Failed);
    }

    #[test]
    fn aggregate_of_empty_map_is_none() {
        assert_eq!(aggregate(&HashMap::new()).0, BranchResizeStatus::None);
    }
}
