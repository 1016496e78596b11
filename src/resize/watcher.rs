//! Event-driven resize progress watcher.
//!
//! Consumes core `Event` objects scoped to `involvedObject.kind=PersistentVolumeClaim`
//! through a bounded queue served by a small worker pool, mirroring the
//! queue-plus-worker-pool shape of `stream_pvc_events`/`_event_worker`
//! (original_source/src/deployment/monitors/resize/pvc_resize.py). `kube::runtime::watcher`
//! already implements the resource-version bookkeeping, exponential backoff, and HTTP
//! 410 resync that the original hand-rolled in Python, so this layer only owns the
//! event→status mapping and the worker pool.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Event;
use kube::runtime::watcher;
use kube::{Api, Client};
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::models::{BranchResizeStatus, ResizeService};
use crate::db::repo::{BranchRepo, ResourceLimitRepo};
use crate::error::Result;
use crate::ids::BranchId;
use crate::quota::QuotaEngine;

use super::status;

const QUEUE_CAPACITY: usize = 2048;
const WORKER_POOL_SIZE: usize = 4;

fn failure_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(resiz\w*.*\b(fail|error)\w*)|(\b(fail|error)\w*.*resiz\w*)").unwrap()
    })
}

/// Infer which service a PVC belongs to from its naming convention.
fn service_from_pvc_name(name: &str) -> Option<ResizeService> {
    if name.ends_with("-storage-pvc") {
        Some(ResizeService::StorageApiDiskResize)
    } else if name.ends_with("-pvc") {
        Some(ResizeService::DatabaseDiskResize)
    } else {
        None
    }
}

fn branch_from_pvc_name(name: &str) -> Option<BranchId> {
    let stem = name.strip_suffix("-storage-pvc").or_else(|| name.strip_suffix("-pvc"))?;
    BranchId::from_str(stem).ok()
}

/// Translate a Kubernetes Event reason/type/message into a resize status, or `None` if
/// the event isn't resize-related.
fn derive_event_status(reason: Option<&str>, event_type: Option<&str>, message: Option<&str>) -> Option<BranchResizeStatus> {
    let reason = reason.unwrap_or_default().to_uppercase();
    match reason.as_str() {
        "RESIZING" | "EXTERNALEXPANDING" => return Some(BranchResizeStatus::Resizing),
        "FILESYSTEMRESIZEREQUIRED" => return Some(BranchResizeStatus::FilesystemResizePending),
        "FILESYSTEMRESIZESUCCESSFUL" | "RESIZEFINISHED" => return Some(BranchResizeStatus::Completed),
        "VOLUMERESIZEFAILED" | "FILESYSTEMRESIZEFAILED" => return Some(BranchResizeStatus::Failed),
        _ => {}
    }
    if event_type.unwrap_or_default().eq_ignore_ascii_case("warning") {
        if let Some(message) = message {
            if failure_pattern().is_match(message) {
                return Some(BranchResizeStatus::Failed);
            }
        }
    }
    None
}

pub async fn run_resize_watcher<R, L>(
    client: Client,
    branches: Arc<R>,
    quota: Arc<QuotaEngine<L>>,
    shutdown: CancellationToken,
) where
    R: BranchRepo + 'static,
    L: ResourceLimitRepo + 'static,
{
    let (tx, rx) = mpsc::channel::<Event>(QUEUE_CAPACITY);

    let mut worker_handles = Vec::with_capacity(WORKER_POOL_SIZE);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for worker_id in 0..WORKER_POOL_SIZE {
        let branches = branches.clone();
        let quota = quota.clone();
        let rx = rx.clone();
        worker_handles.push(tokio::spawn(async move {
            loop {
                let event = { rx.lock().await.recv().await };
                let Some(event) = event else { break };
                if let Err(e) = handle_event(&branches, &quota, &event).await {
                    warn!(worker_id, "resize event worker failed to process event: {e}");
                }
            }
        }));
    }

    let api: Api<Event> = Api::all(client);
    let config = watcher::Config::default().fields("involvedObject.kind=PersistentVolumeClaim");
    let mut stream = watcher(api, config).boxed();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("resize watcher shutting down");
                drop(tx);
                for handle in worker_handles {
                    let _ = handle.await;
                }
                return;
            }
            next = stream.next() => {
                match next {
                    Some(Ok(watcher::Event::Apply(event) | watcher::Event::InitApply(event))) => {
                        if tx.send(event).await.is_err() {
                            warn!("resize event queue closed, dropping event");
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!("resize watcher stream error: {e}"),
                    None => {
                        warn!("resize watcher stream ended");
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_event<R: BranchRepo, L: ResourceLimitRepo>(
    branches: &Arc<R>,
    quota: &Arc<QuotaEngine<L>>,
    event: &Event,
) -> Result<()> {
    let Some(involved) = &event.involved_object.name else { return Ok(()) };
    let Some(service) = service_from_pvc_name(involved) else { return Ok(()) };
    let Some(branch) = branch_from_pvc_name(involved) else { return Ok(()) };

    let Some(new_status) = derive_event_status(
        event.reason.as_deref(),
        event.type_.as_deref(),
        event.message.as_deref(),
    ) else {
        return Ok(());
    };

    let branch_row = branches.get(branch).await?;
    let mut statuses = branch_row.resize_statuses.0.clone();
    let advanced = status::advance(&mut statuses, service, new_status, chrono::Utc::now());
    if !advanced {
        return Ok(());
    }
    branches.update_resize_statuses(branch, statuses).await?;

    if new_status == BranchResizeStatus::Completed {
        commit_completed_disk_resize(branches, quota, branch, service).await?;
    }
    Ok(())
}

async fn commit_completed_disk_resize<R: BranchRepo, L: ResourceLimitRepo>(
    branches: &Arc<R>,
    quota: &Arc<QuotaEngine<L>>,
    branch: BranchId,
    service: ResizeService,
) -> Result<()> {
    let resource = match service {
        ResizeService::DatabaseDiskResize => crate::db::models::ResourceType::DatabaseSize,
        ResizeService::StorageApiDiskResize => crate::db::models::ResourceType::StorageSize,
        _ => return Ok(()),
    };
    let branch_row = branches.get(branch).await?;
    let amount = match resource {
        crate::db::models::ResourceType::DatabaseSize => branch_row.database_size,
        crate::db::models::ResourceType::StorageSize => branch_row.storage_size,
        _ => unreachable!(),
    };
    quota.commit_provisioning(branch, resource, amount, Some("resize completed".to_string())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_suffix_maps_to_storage_service() {
        assert_eq!(service_from_pvc_name("01ARZ-storage-pvc"), Some(ResizeService::StorageApiDiskResize));
    }

    #[test]
    fn plain_pvc_suffix_maps_to_database_service() {
        assert_eq!(service_from_pvc_name("01ARZ-pvc"), Some(ResizeService::DatabaseDiskResize));
    }

    #[test]
    fn unrelated_pvc_name_maps_to_nothing() {
        assert_eq!(service_from_pvc_name("unrelated-volume"), None);
    }

    #[test]
    fn reason_mapping_matches_known_transitions() {
        assert_eq!(derive_event_status(Some("Resizing"), None, None), Some(BranchResizeStatus::Resizing));
        assert_eq!(derive_event_status(Some("FileSystemResizeSuccessful"), None, None), Some(BranchResizeStatus::Completed));
        assert_eq!(derive_event_status(Some("VolumeResizeFailed"), None, None), Some(BranchResizeStatus::Failed));
        assert_eq!(derive_event_status(None, Some("Warning"), Some("resize operation failed unexpectedly")), Some(BranchResizeStatus::Failed));
        assert_eq!(derive_event_status(None, Some("Normal"), Some("unrelated")), None);
    }
}
