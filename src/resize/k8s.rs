//! VM CPU/memory patch execution.
//!
//! The VM CRD has no generated type (same situation as `snapshot::k8s` and
//! `reconciler::vm`), so patches are JSON merge patches applied through a
//! [`DynamicObject`]-typed `Api`.

use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::Client;
use tracing::warn;

use crate::error::{OperationError, Result};
use crate::reconciler::vm::virtual_machine_resource;

fn vm_api(client: &Client, namespace: &str) -> kube::Api<kube::core::DynamicObject> {
    kube::Api::namespaced_with(client.clone(), namespace, &virtual_machine_resource())
}

/// `request=floor(milli/1000)` cores, `limit=ceil(milli/1000)` cores.
pub fn cpu_request_limit_cores(milli_vcpu: i64) -> (i64, i64) {
    (milli_vcpu / 1000, (milli_vcpu + 999) / 1000)
}

pub async fn patch_vm_cpu(
    client: &Client,
    namespace: &str,
    name: &str,
    milli_vcpu: i64,
    retry_attempts: u32,
    retry_delay: Duration,
) -> Result<()> {
    let (request_cores, limit_cores) = cpu_request_limit_cores(milli_vcpu);
    let patch = serde_json::json!({
        "spec": {
            "template": {
                "spec": {
                    "domain": {
                        "resources": {
                            "requests": { "cpu": request_cores.to_string() },
                            "limits": { "cpu": limit_cores.to_string() },
                        }
                    }
                }
            }
        }
    });

    let api = vm_api(client, namespace);
    let mut attempt = 0;
    loop {
        match api.patch(name, &PatchParams::apply("vela-core"), &Patch::Merge(&patch)).await {
            Ok(_) => return Ok(()),
            Err(e) if attempt + 1 < retry_attempts => {
                attempt += 1;
                warn!(%name, attempt, "VM CPU patch failed, retrying: {e}");
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(OperationError::Kube(e)),
        }
    }
}

/// Compute the minimum number of memory slots covering `memory_bytes`, rejecting a
/// request that would exceed `max_slots` or shrink below `current_usage_bytes`.
pub fn required_memory_slots(memory_bytes: i64, slot_size_bytes: i64, max_slots: i64, current_usage_bytes: i64) -> Result<i64> {
    if memory_bytes < current_usage_bytes {
        return Err(OperationError::validation(format!(
            "requested memory {memory_bytes} is below current usage {current_usage_bytes}"
        )));
    }
    let slots = (memory_bytes + slot_size_bytes - 1) / slot_size_bytes;
    if slots > max_slots {
        return Err(OperationError::validation(format!(
            "requested memory needs {slots} slots, exceeding the configured maximum of {max_slots}"
        )));
    }
    Ok(slots)
}

pub async fn patch_vm_memory(
    client: &Client,
    namespace: &str,
    name: &str,
    memory_bytes: i64,
    slot_size_bytes: i64,
    max_slots: i64,
    current_usage_bytes: i64,
) -> Result<()> {
    let slots = required_memory_slots(memory_bytes, slot_size_bytes, max_slots, current_usage_bytes)?;
    let total_bytes = slots * slot_size_bytes;
    let patch = serde_json::json!({
        "spec": {
            "template": {
                "spec": {
                    "domain": {
                        "memory": { "guest": format!("{total_bytes}") }
                    }
                }
            }
        }
    });
    vm_api(client, namespace)
        .patch(name, &PatchParams::apply("vela-core"), &Patch::Merge(&patch))
        .await
        .map_err(OperationError::Kube)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_cores_round_request_down_and_limit_up() {
        assert_eq!(cpu_request_limit_cores(2500), (2, 3));
        assert_eq!(cpu_request_limit_cores(4000), (4, 4));
    }

    #[test]
    fn memory_slots_reject_shrink_below_usage() {
        let result = required_memory_slots(1_000, 128, 100, 2_000);
        assert!(result.is_err());
    }

    #[test]
    fn memory_slots_reject_exceeding_max() {
        let result = required_memory_slots(128 * 10_000, 128, 100, 0);
        assert!(result.is_err());
    }

    #[test]
    fn memory_slots_round_up_to_cover_request() {
        assert_eq!(required_memory_slots(300, 128, 100, 0).unwrap(), 3);
    }
}
