//! Thin CSI VolumeSnapshot/VolumeSnapshotContent/PVC wrappers.
//!
//! VolumeSnapshot and VolumeSnapshotContent are cluster CRDs with no generated Rust
//! types in `k8s-openapi`, so they're addressed as [`DynamicObject`]s via dynamic API
//! discovery rather than typed clients.

use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, PersistentVolumeClaimSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, TypeMeta};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};

use crate::error::{OperationError, Result};

pub fn volume_snapshot_resource() -> ApiResource {
    ApiResource {
        group: "snapshot.storage.k8s.io".into(),
        version: "v1".into(),
        api_version: "snapshot.storage.k8s.io/v1".into(),
        kind: "VolumeSnapshot".into(),
        plural: "volumesnapshots".into(),
    }
}

pub fn volume_snapshot_content_resource() -> ApiResource {
    ApiResource {
        group: "snapshot.storage.k8s.io".into(),
        version: "v1".into(),
        api_version: "snapshot.storage.k8s.io/v1".into(),
        kind: "VolumeSnapshotContent".into(),
        plural: "volumesnapshotcontents".into(),
    }
}

pub async fn ensure_namespace(client: &Client, namespace: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    match api.get(namespace).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            let ns = Namespace {
                metadata: ObjectMeta { name: Some(namespace.to_string()), ..Default::default() },
                ..Default::default()
            };
            match api.create(&PostParams::default(), &ns).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
                Err(e) => Err(OperationError::Kube(e)),
            }
        }
        Err(e) => Err(OperationError::Kube(e)),
    }
}

pub async fn create_snapshot_from_pvc(
    client: &Client,
    namespace: &str,
    name: &str,
    snapshot_class: &str,
    pvc_name: &str,
) -> Result<()> {
    let source = serde_json::json!({ "persistentVolumeClaimName": pvc_name });
    create_snapshot(client, namespace, name, snapshot_class, source).await
}

pub async fn create_snapshot_from_content(
    client: &Client,
    namespace: &str,
    name: &str,
    snapshot_class: &str,
    content_name: &str,
) -> Result<()> {
    let source = serde_json::json!({ "volumeSnapshotContentName": content_name });
    create_snapshot(client, namespace, name, snapshot_class, source).await
}

async fn create_snapshot(
    client: &Client,
    namespace: &str,
    name: &str,
    snapshot_class: &str,
    source: serde_json::Value,
) -> Result<()> {
    let api_resource = volume_snapshot_resource();
    let api: kube::Api<kube::core::DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &api_resource);

    let object = kube::core::DynamicObject {
        types: Some(TypeMeta {
            api_version: api_resource.api_version.clone(),
            kind: api_resource.kind.clone(),
        }),
        metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(namespace.to_string()), ..Default::default() },
        data: serde_json::json!({
            "spec": {
                "volumeSnapshotClassName": snapshot_class,
                "source": source,
            }
        }),
    };

    match api.create(&PostParams::default(), &object).await {
        Ok(_) => Ok(()),
        Err(e) => Err(OperationError::Kube(e)),
    }
}

pub async fn create_snapshot_content_from_handle(
    client: &Client,
    name: &str,
    driver: &str,
    snapshot_handle: &str,
    snapshot_class: &str,
    snapshot_namespace: &str,
    snapshot_name: &str,
) -> Result<()> {
    let api_resource = volume_snapshot_content_resource();
    let api: kube::Api<kube::core::DynamicObject> = Api::all_with(client.clone(), &api_resource);

    let object = kube::core::DynamicObject {
        types: Some(TypeMeta {
            api_version: api_resource.api_version.clone(),
            kind: api_resource.kind.clone(),
        }),
        metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
        data: serde_json::json!({
            "spec": {
                "driver": driver,
                "deletionPolicy": "Delete",
                "source": { "snapshotHandle": snapshot_handle },
                "volumeSnapshotClassName": snapshot_class,
                "volumeSnapshotRef": {
                    "name": snapshot_name,
                    "namespace": snapshot_namespace,
                }
            }
        }),
    };

    api.create(&PostParams::default(), &object).await.map_err(OperationError::Kube)?;
    Ok(())
}

pub async fn read_snapshot(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<kube::core::DynamicObject>> {
    let api_resource = volume_snapshot_resource();
    let api: kube::Api<kube::core::DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &api_resource);
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(OperationError::Kube(e)),
    }
}

pub async fn read_snapshot_content(
    client: &Client,
    name: &str,
) -> Result<Option<kube::core::DynamicObject>> {
    let api_resource = volume_snapshot_content_resource();
    let api: kube::Api<kube::core::DynamicObject> = Api::all_with(client.clone(), &api_resource);
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(OperationError::Kube(e)),
    }
}

pub async fn delete_snapshot(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api_resource = volume_snapshot_resource();
    let api: kube::Api<kube::core::DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &api_resource);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(OperationError::Kube(e)),
    }
}

pub async fn delete_snapshot_content(client: &Client, name: &str) -> Result<()> {
    let api_resource = volume_snapshot_content_resource();
    let api: kube::Api<kube::core::DynamicObject> = Api::all_with(client.clone(), &api_resource);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(OperationError::Kube(e)),
    }
}

/// Extracted material needed to recreate a snapshot's content elsewhere.
pub struct SnapshotMaterial {
    pub driver: String,
    pub handle: String,
    pub snapshot_class: String,
}

pub fn snapshot_ready(snapshot: &Option<kube::core::DynamicObject>) -> bool {
    snapshot
        .as_ref()
        .and_then(|s| s.data.get("status"))
        .and_then(|s| s.get("readyToUse"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub async fn extract_snapshot_material(
    client: &Client,
    namespace: &str,
    snapshot: &kube::core::DynamicObject,
    explicit_content_name: Option<&str>,
    default_snapshot_class: &str,
) -> Result<(SnapshotMaterial, String)> {
    let content_name = explicit_content_name
        .map(str::to_string)
        .or_else(|| {
            snapshot
                .data
                .get("status")
                .and_then(|s| s.get("boundVolumeSnapshotContentName"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .ok_or_else(|| {
            OperationError::Internal(format!(
                "VolumeSnapshot {}/{} missing content reference",
                namespace,
                snapshot.name_any()
            ))
        })?;

    let content = read_snapshot_content(client, &content_name)
        .await?
        .ok_or_else(|| {
            OperationError::NotFound(format!(
                "VolumeSnapshotContent {content_name} not found for snapshot restoration"
            ))
        })?;

    let handle = content
        .data
        .get("status")
        .and_then(|s| s.get("snapshotHandle"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| OperationError::Internal(format!("VolumeSnapshotContent {content_name} missing snapshotHandle")))?
        .to_string();

    let driver = content
        .data
        .get("spec")
        .and_then(|s| s.get("driver"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| OperationError::Internal(format!("VolumeSnapshotContent {content_name} missing driver")))?
        .to_string();

    let snapshot_class = content
        .data
        .get("spec")
        .and_then(|s| s.get("volumeSnapshotClassName"))
        .and_then(|v| v.as_str())
        .or_else(|| {
            snapshot
                .data
                .get("spec")
                .and_then(|s| s.get("volumeSnapshotClassName"))
                .and_then(|v| v.as_str())
        })
        .unwrap_or(default_snapshot_class)
        .to_string();

    Ok((SnapshotMaterial { driver, handle, snapshot_class }, content_name))
}

// ---------------------------------------------------------------------------
// PVC helpers
// ---------------------------------------------------------------------------

pub async fn read_pvc(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<PersistentVolumeClaim>> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    match api.get(name).await {
        Ok(pvc) => Ok(Some(pvc)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(OperationError::Kube(e)),
    }
}

pub async fn delete_pvc(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(OperationError::Kube(e)),
    }
}

pub fn pvc_bound(pvc: &Option<PersistentVolumeClaim>) -> bool {
    pvc.as_ref()
        .and_then(|p| p.status.as_ref())
        .and_then(|s| s.phase.as_ref())
        .map(|phase| phase == "Bound")
        .unwrap_or(false)
}

/// Build a manifest for the target PVC by rewriting an existing source PVC's spec: new
/// name/namespace, new storage class, and a dataSource pointing at the freshly-cloned
/// snapshot. Controller-managed metadata (resourceVersion, uid, owner refs) is dropped.
pub fn build_pvc_from_existing(
    source: &PersistentVolumeClaim,
    namespace: &str,
    name: &str,
    storage_class_name: &str,
    volume_snapshot_name: &str,
    release_name: &str,
) -> PersistentVolumeClaim {
    let source_spec = source.spec.clone().unwrap_or_default();

    let mut annotations = std::collections::BTreeMap::new();
    annotations.insert("meta.helm.sh/release-name".to_string(), release_name.to_string());
    annotations.insert("meta.helm.sh/release-namespace".to_string(), namespace.to_string());

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: source.metadata.labels.clone(),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: source_spec.access_modes,
            resources: source_spec.resources,
            storage_class_name: Some(storage_class_name.to_string()),
            data_source: Some(k8s_openapi::api::core::v1::TypedLocalObjectReference {
                api_group: Some("snapshot.storage.k8s.io".to_string()),
                kind: "VolumeSnapshot".to_string(),
                name: volume_snapshot_name.to_string(),
            }),
            data_source_ref: Some(k8s_openapi::api::core::v1::TypedObjectReference {
                api_group: Some("snapshot.storage.k8s.io".to_string()),
                kind: "VolumeSnapshot".to_string(),
                name: volume_snapshot_name.to_string(),
                namespace: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub async fn create_pvc(client: &Client, namespace: &str, pvc: &PersistentVolumeClaim) -> Result<()> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    api.create(&PostParams::default(), pvc).await.map_err(OperationError::Kube)?;
    Ok(())
}

/// Patch a PVC's requested storage size. The CSI resize controller rejects a decrease;
/// callers enforce the non-decreasing invariant before calling this.
pub async fn patch_pvc_storage_request(
    client: &Client,
    namespace: &str,
    name: &str,
    new_size_bytes: i64,
) -> Result<()> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({
        "spec": {
            "resources": {
                "requests": {
                    "storage": Quantity(new_size_bytes.to_string()).0
                }
            }
        }
    });
    api.patch(name, &PatchParams::apply("vela-core"), &Patch::Merge(patch))
        .await
        .map_err(OperationError::Kube)?;
    Ok(())
}

pub async fn list_snapshots_for_label(
    client: &Client,
    namespace: &str,
    label_selector: &str,
) -> Result<Vec<kube::core::DynamicObject>> {
    let api_resource = volume_snapshot_resource();
    let api: kube::Api<kube::core::DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &api_resource);
    let list = api
        .list(&ListParams::default().labels(label_selector))
        .await
        .map_err(OperationError::Kube)?;
    Ok(list.items)
}
