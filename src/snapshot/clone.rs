//! Cross-namespace volume clone/restore state machines (C1).
//!
//! Grounded in `_VolumeCloneOperation`/`_SnapshotRestoreOperation`
//! (original_source/src/deployment/kubernetes/volume_clone.py): idempotent under
//! crash-resume (clears prior artifacts before starting), and rolls back whatever it
//! created on failure rather than leaving partial state behind.

use std::time::Duration;

use kube::Client;
use tracing::{info, instrument, warn};

use crate::error::{OperationError, Result};
use crate::ids::BranchId;

use super::{k8s, naming, wait};

#[derive(Debug, Clone, Copy)]
pub struct CloneTimeouts {
    pub snapshot_ready: Duration,
    pub snapshot_poll: Duration,
    pub pvc_ready: Duration,
    pub pvc_poll: Duration,
}

impl Default for CloneTimeouts {
    fn default() -> Self {
        Self {
            snapshot_ready: Duration::from_secs(600),
            snapshot_poll: Duration::from_secs(2),
            pvc_ready: Duration::from_secs(600),
            pvc_poll: Duration::from_secs(2),
        }
    }
}

pub struct CapturedSnapshot {
    pub name: String,
    pub namespace: String,
    pub content_name: Option<String>,
    pub size_bytes: Option<i64>,
}

/// C1 operation 1: snapshot a running branch's database PVC in place.
#[instrument(skip(client), fields(%branch))]
pub async fn capture_snapshot(
    client: &Client,
    branch: BranchId,
    namespace: &str,
    pvc_name: &str,
    snapshot_class: &str,
    label: &str,
    timeouts: CloneTimeouts,
) -> Result<CapturedSnapshot> {
    let name = naming::snapshot_name(branch, label);
    k8s::create_snapshot_from_pvc(client, namespace, &name, snapshot_class, pvc_name).await?;

    let snapshot = wait::wait_for_condition(
        || async { k8s::read_snapshot(client, namespace, &name).await },
        k8s::snapshot_ready,
        timeouts.snapshot_ready,
        timeouts.snapshot_poll,
        Some(&format!("VolumeSnapshot {namespace}/{name} not found while waiting for readiness")),
        &format!("Timed out waiting for VolumeSnapshot {namespace}/{name} to become ready"),
    )
    .await?
    .expect("wait_for_condition returns Some when not_found_message is set");

    let content_name = snapshot
        .data
        .get("status")
        .and_then(|s| s.get("boundVolumeSnapshotContentName"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let size_bytes = snapshot
        .data
        .get("status")
        .and_then(|s| s.get("restoreSize"))
        .and_then(|v| v.as_str())
        .and_then(parse_quantity_bytes);

    Ok(CapturedSnapshot { name, namespace: namespace.to_string(), content_name, size_bytes })
}

/// Parse a Kubernetes quantity string (binary or decimal suffix) into bytes.
fn parse_quantity_bytes(s: &str) -> Option<i64> {
    const UNITS: &[(&str, i64)] = &[
        ("Ki", 1024),
        ("Mi", 1024i64.pow(2)),
        ("Gi", 1024i64.pow(3)),
        ("Ti", 1024i64.pow(4)),
        ("K", 1000),
        ("M", 1000i64.pow(2)),
        ("G", 1000i64.pow(3)),
        ("T", 1000i64.pow(4)),
    ];
    for (suffix, multiplier) in UNITS {
        if let Some(stripped) = s.strip_suffix(suffix) {
            return stripped.parse::<f64>().ok().map(|v| (v * *multiplier as f64) as i64);
        }
    }
    s.parse::<i64>().ok()
}

struct CloneIds {
    pvc: String,
    source_namespace: String,
    target_namespace: String,
    source_snapshot: String,
    target_snapshot: String,
    snapshot_content: String,
}

struct CloneState {
    created_source_snapshot: bool,
    created_target_snapshot: bool,
    created_content: bool,
}

async fn clear_previous_artifacts(
    client: &Client,
    ids: &CloneIds,
    timeouts: CloneTimeouts,
    clear_source_snapshot: bool,
) -> Result<()> {
    if clear_source_snapshot {
        ensure_snapshot_absent(client, &ids.source_namespace, &ids.source_snapshot, timeouts).await?;
    }
    ensure_snapshot_absent(client, &ids.target_namespace, &ids.target_snapshot, timeouts).await?;
    ensure_snapshot_content_absent(client, &ids.snapshot_content, timeouts).await?;
    Ok(())
}

async fn ensure_snapshot_absent(
    client: &Client,
    namespace: &str,
    name: &str,
    timeouts: CloneTimeouts,
) -> Result<()> {
    if k8s::read_snapshot(client, namespace, name).await?.is_none() {
        return Ok(());
    }
    k8s::delete_snapshot(client, namespace, name).await?;
    wait::wait_for_absence(
        || async { k8s::read_snapshot(client, namespace, name).await },
        timeouts.snapshot_ready,
        timeouts.snapshot_poll,
        &format!("Timed out waiting for VolumeSnapshot {namespace}/{name} deletion"),
    )
    .await
}

async fn ensure_snapshot_content_absent(
    client: &Client,
    name: &str,
    timeouts: CloneTimeouts,
) -> Result<()> {
    if k8s::read_snapshot_content(client, name).await?.is_none() {
        return Ok(());
    }
    k8s::delete_snapshot_content(client, name).await?;
    wait::wait_for_absence(
        || async { k8s::read_snapshot_content(client, name).await },
        timeouts.snapshot_ready,
        timeouts.snapshot_poll,
        &format!("Timed out waiting for VolumeSnapshotContent {name} deletion"),
    )
    .await
}

async fn materialize_target_snapshot(
    client: &Client,
    ids: &CloneIds,
    material: &k8s::SnapshotMaterial,
    timeouts: CloneTimeouts,
    state: &mut CloneState,
) -> Result<()> {
    k8s::create_snapshot_content_from_handle(
        client,
        &ids.snapshot_content,
        &material.driver,
        &material.handle,
        &material.snapshot_class,
        &ids.target_namespace,
        &ids.target_snapshot,
    )
    .await?;
    state.created_content = true;

    k8s::create_snapshot_from_content(
        client,
        &ids.target_namespace,
        &ids.target_snapshot,
        &material.snapshot_class,
        &ids.snapshot_content,
    )
    .await?;
    state.created_target_snapshot = true;

    wait::wait_for_condition(
        || async { k8s::read_snapshot(client, &ids.target_namespace, &ids.target_snapshot).await },
        k8s::snapshot_ready,
        timeouts.snapshot_ready,
        timeouts.snapshot_poll,
        Some("target VolumeSnapshot disappeared while waiting for readiness"),
        "Timed out waiting for target VolumeSnapshot to become ready",
    )
    .await?;
    Ok(())
}

async fn create_target_pvc(
    client: &Client,
    ids: &CloneIds,
    storage_class_name: &str,
    release_name: &str,
    timeouts: CloneTimeouts,
) -> Result<()> {
    let source_pvc = k8s::read_pvc(client, &ids.source_namespace, &ids.pvc)
        .await?
        .ok_or_else(|| OperationError::NotFound(format!("source PVC {}/{}", ids.source_namespace, ids.pvc)))?;

    let manifest = k8s::build_pvc_from_existing(
        &source_pvc,
        &ids.target_namespace,
        &ids.pvc,
        storage_class_name,
        &ids.target_snapshot,
        release_name,
    );

    k8s::delete_pvc(client, &ids.target_namespace, &ids.pvc).await?;
    wait::wait_for_absence(
        || async { k8s::read_pvc(client, &ids.target_namespace, &ids.pvc).await },
        timeouts.pvc_ready,
        timeouts.pvc_poll,
        &format!("Timed out waiting for PVC {}/{} deletion", ids.target_namespace, ids.pvc),
    )
    .await?;

    k8s::create_pvc(client, &ids.target_namespace, &manifest).await?;
    wait::wait_for_condition(
        || async { k8s::read_pvc(client, &ids.target_namespace, &ids.pvc).await },
        k8s::pvc_bound,
        timeouts.pvc_ready,
        timeouts.pvc_poll,
        Some(&format!("PVC {}/{} disappeared while waiting to bind", ids.target_namespace, ids.pvc)),
        &format!("Timed out waiting for PVC {}/{} to become bound", ids.target_namespace, ids.pvc),
    )
    .await?;
    Ok(())
}

async fn cleanup_created_resources(client: &Client, ids: &CloneIds, state: &CloneState) {
    if state.created_target_snapshot {
        if let Err(e) = k8s::delete_snapshot(client, &ids.target_namespace, &ids.target_snapshot).await {
            warn!("best-effort cleanup of target snapshot failed: {e}");
        }
    }
    if state.created_content {
        if let Err(e) = k8s::delete_snapshot_content(client, &ids.snapshot_content).await {
            warn!("best-effort cleanup of snapshot content failed: {e}");
        }
    }
    if state.created_source_snapshot {
        if let Err(e) = k8s::delete_snapshot(client, &ids.source_namespace, &ids.source_snapshot).await {
            warn!("best-effort cleanup of source snapshot failed: {e}");
        }
    }
}

/// C1 operation 2: clone a branch's database volume into a brand new branch's namespace.
#[instrument(skip(client), fields(%source_branch, %target_branch))]
pub async fn clone_volume(
    client: &Client,
    source_branch: BranchId,
    target_branch: BranchId,
    source_namespace: &str,
    target_namespace: &str,
    pvc_name: &str,
    snapshot_class: &str,
    storage_class_name: &str,
    release_name: &str,
    timeouts: CloneTimeouts,
) -> Result<()> {
    let (source_snapshot, target_snapshot) = naming::clone_snapshot_names(source_branch, target_branch);
    let ids = CloneIds {
        pvc: pvc_name.to_string(),
        source_namespace: source_namespace.to_string(),
        target_namespace: target_namespace.to_string(),
        source_snapshot,
        target_snapshot,
        snapshot_content: naming::crossns_content_name(target_branch),
    };
    let mut state = CloneState { created_source_snapshot: false, created_target_snapshot: false, created_content: false };

    k8s::ensure_namespace(client, &ids.target_namespace).await?;
    clear_previous_artifacts(client, &ids, timeouts, true).await?;

    let result: Result<()> = async {
        k8s::create_snapshot_from_pvc(client, &ids.source_namespace, &ids.source_snapshot, snapshot_class, &ids.pvc).await?;
        state.created_source_snapshot = true;

        let snapshot = wait::wait_for_condition(
            || async { k8s::read_snapshot(client, &ids.source_namespace, &ids.source_snapshot).await },
            k8s::snapshot_ready,
            timeouts.snapshot_ready,
            timeouts.snapshot_poll,
            Some("source VolumeSnapshot disappeared while waiting for readiness"),
            "Timed out waiting for source VolumeSnapshot to become ready",
        )
        .await?
        .expect("checked above");

        let (material, _) =
            k8s::extract_snapshot_material(client, &ids.source_namespace, &snapshot, None, snapshot_class).await?;
        info!(snapshot = %ids.source_snapshot, "captured source snapshot for branch clone");

        materialize_target_snapshot(client, &ids, &material, timeouts, &mut state).await?;
        info!(snapshot = %ids.target_snapshot, content = %ids.snapshot_content, "materialized target snapshot");

        create_target_pvc(client, &ids, storage_class_name, release_name, timeouts).await?;
        info!(pvc = %ids.pvc, target_namespace = %ids.target_namespace, "cloned PVC");
        Ok(())
    }
    .await;

    if result.is_err() {
        cleanup_created_resources(client, &ids, &state).await;
    }
    result
}

/// C1 operation 3: restore a branch's database volume from an existing snapshot.
#[instrument(skip(client), fields(%target_branch, %snapshot_namespace, %snapshot_name))]
pub async fn restore_volume(
    client: &Client,
    target_branch: BranchId,
    source_pvc_namespace: &str,
    pvc_name: &str,
    target_namespace: &str,
    snapshot_namespace: &str,
    snapshot_name: &str,
    snapshot_content_name: Option<&str>,
    snapshot_class: &str,
    storage_class_name: &str,
    release_name: &str,
    timeouts: CloneTimeouts,
) -> Result<()> {
    let ids = CloneIds {
        pvc: pvc_name.to_string(),
        source_namespace: snapshot_namespace.to_string(),
        target_namespace: target_namespace.to_string(),
        source_snapshot: snapshot_name.to_string(),
        target_snapshot: naming::restore_snapshot_name(target_branch),
        snapshot_content: naming::restore_content_name(target_branch),
    };
    let mut state = CloneState { created_source_snapshot: false, created_target_snapshot: false, created_content: false };

    k8s::ensure_namespace(client, &ids.target_namespace).await?;
    clear_previous_artifacts(client, &ids, timeouts, false).await?;

    let result: Result<()> = async {
        let snapshot = wait::wait_for_condition(
            || async { k8s::read_snapshot(client, snapshot_namespace, snapshot_name).await },
            k8s::snapshot_ready,
            timeouts.snapshot_ready,
            timeouts.snapshot_poll,
            Some(&format!("VolumeSnapshot {snapshot_namespace}/{snapshot_name} not found")),
            &format!("Timed out waiting for VolumeSnapshot {snapshot_namespace}/{snapshot_name} to become ready"),
        )
        .await?
        .expect("checked above");

        let (material, _) = k8s::extract_snapshot_material(
            client,
            snapshot_namespace,
            &snapshot,
            snapshot_content_name,
            snapshot_class,
        )
        .await?;
        info!(%snapshot_namespace, %snapshot_name, "using snapshot for branch restore");

        materialize_target_snapshot(client, &ids, &material, timeouts, &mut state).await?;
        info!(snapshot = %ids.target_snapshot, content = %ids.snapshot_content, "materialized restore snapshot");

        create_target_pvc(
            client,
            &CloneIds {
                pvc: pvc_name.to_string(),
                source_namespace: source_pvc_namespace.to_string(),
                target_namespace: target_namespace.to_string(),
                source_snapshot: ids.source_snapshot.clone(),
                target_snapshot: ids.target_snapshot.clone(),
                snapshot_content: ids.snapshot_content.clone(),
            },
            storage_class_name,
            release_name,
            timeouts,
        )
        .await?;
        info!(pvc = %ids.pvc, target_namespace = %ids.target_namespace, "restored PVC");
        Ok(())
    }
    .await;

    if result.is_err() {
        // Restore's failure path never rolls back the source snapshot — it was never
        // created by this operation, only referenced.
        cleanup_created_resources(client, &ids, &state).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_and_decimal_quantities() {
        assert_eq!(parse_quantity_bytes("10Gi"), Some(10 * 1024i64.pow(3)));
        assert_eq!(parse_quantity_bytes("5G"), Some(5 * 1000i64.pow(3)));
        assert_eq!(parse_quantity_bytes("2048"), Some(2048));
    }
}
