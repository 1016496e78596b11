//! KubeVirt/Neon VirtualMachine phase lookup.
//!
//! Like the CSI snapshot types, `VirtualMachine` has no generated `k8s-openapi` type —
//! it's addressed as a [`DynamicObject`] the same way `snapshot::k8s` handles
//! VolumeSnapshots.

use kube::api::{Api, ListParams};
use kube::discovery::ApiResource;
use kube::Client;

use crate::error::{OperationError, Result};

pub fn virtual_machine_resource() -> ApiResource {
    ApiResource {
        group: "kubevirt.io".into(),
        version: "v1".into(),
        api_version: "kubevirt.io/v1".into(),
        kind: "VirtualMachine".into(),
        plural: "virtualmachines".into(),
    }
}

/// VM lifecycle phases that indicate the VM is up and probing its services is worthwhile.
pub const ACTIVE_PHASES: [&str; 4] = ["Running", "Pre-migrating", "Migrating", "Scaling"];

pub fn printable_status(vm: &kube::core::DynamicObject) -> Option<String> {
    vm.data
        .get("status")
        .and_then(|s| s.get("printableStatus"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            vm.data
                .get("status")
                .and_then(|s| s.get("conditions"))
                .and_then(|c| c.as_array())
                .and_then(|conditions| {
                    conditions.iter().find_map(|c| {
                        if c.get("type").and_then(|t| t.as_str()) == Some("Ready")
                            && c.get("status").and_then(|s| s.as_str()) == Some("True")
                        {
                            Some("Running".to_string())
                        } else {
                            None
                        }
                    })
                })
        })
}

pub fn is_errored(phase: &str) -> bool {
    phase.eq_ignore_ascii_case("crashloopbackoff") || phase.eq_ignore_ascii_case("error") || phase.eq_ignore_ascii_case("failed")
}

pub async fn read_vm(client: &Client, namespace: &str, name: &str) -> Result<Option<kube::core::DynamicObject>> {
    let api_resource = virtual_machine_resource();
    let api: Api<kube::core::DynamicObject> = Api::namespaced_with(client.clone(), namespace, &api_resource);
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(OperationError::Kube(e)),
    }
}

pub async fn list_vms(client: &Client, namespace_prefix: &str) -> Result<Vec<kube::core::DynamicObject>> {
    let api_resource = virtual_machine_resource();
    let api: Api<kube::core::DynamicObject> = Api::all_with(client.clone(), &api_resource);
    let list = api
        .list(&ListParams::default())
        .await
        .map_err(OperationError::Kube)?;
    Ok(list
        .items
        .into_iter()
        .filter(|vm| vm.metadata.namespace.as_deref().is_some_and(|ns| ns.starts_with(namespace_prefix)))
        .collect())
}
