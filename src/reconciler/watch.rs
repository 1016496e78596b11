//! Long-lived watch over KubeVirt/Neon VirtualMachine objects, spawning and cancelling
//! the per-branch probe monitor ([`super::monitor::BranchMonitor`]) as VMs come and go.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::repo::BranchRepo;
use crate::ids::BranchId;

use super::monitor::BranchMonitor;
use super::vm::{self, virtual_machine_resource, ACTIVE_PHASES};

/// Parse the branch ID embedded in a branch namespace of the form `<prefix>-<ULID>`.
fn branch_id_from_namespace(namespace: &str, prefix: &str) -> Option<BranchId> {
    let suffix = namespace.strip_prefix(prefix)?.strip_prefix('-')?;
    BranchId::from_str(suffix).ok()
}

/// Run the VM watch loop until the token is cancelled. Spawns a [`BranchMonitor`] task
/// per branch whose VM enters an active phase; cancels it on delete or when the VM
/// leaves an active phase.
pub async fn run_vm_watch<R: BranchRepo + 'static>(
    client: Client,
    repo: Arc<R>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) {
    let api_resource = virtual_machine_resource();
    let api: kube::Api<kube::core::DynamicObject> = kube::Api::all_with(client.clone(), &api_resource);

    let mut monitors: HashMap<BranchId, CancellationToken> = HashMap::new();
    let mut stream = watcher(api, watcher::Config::default()).boxed();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("VM watch shutting down, cancelling {} monitors", monitors.len());
                for token in monitors.values() {
                    token.cancel();
                }
                return;
            }
            event = stream.next() => {
                let Some(event) = event else {
                    warn!("VM watch stream ended");
                    return;
                };
                match event {
                    Ok(event) => handle_vm_event(&client, &repo, &config, &mut monitors, event),
                    Err(e) => warn!("VM watch error: {e}"),
                }
            }
        }
    }
}

fn handle_vm_event<R: BranchRepo + 'static>(
    client: &Client,
    repo: &Arc<R>,
    config: &Arc<Config>,
    monitors: &mut HashMap<BranchId, CancellationToken>,
    event: watcher::Event<kube::core::DynamicObject>,
) {
    match event {
        watcher::Event::Apply(object) | watcher::Event::InitApply(object) => {
            apply_vm(client, repo, config, monitors, object);
        }
        watcher::Event::Delete(object) => {
            delete_vm(config, monitors, &object);
        }
        watcher::Event::Init | watcher::Event::InitDone => {}
    }
}

fn apply_vm<R: BranchRepo + 'static>(
    client: &Client,
    repo: &Arc<R>,
    config: &Arc<Config>,
    monitors: &mut HashMap<BranchId, CancellationToken>,
    object: kube::core::DynamicObject,
) {
    let Some(namespace) = object.metadata.namespace.clone() else { return };
    let Some(branch) = branch_id_from_namespace(&namespace, &config.namespace_prefix) else { return };

    let phase = vm::printable_status(&object);
    let is_active = phase.as_deref().map(|p| ACTIVE_PHASES.contains(&p)).unwrap_or(false);

    if is_active {
        if monitors.contains_key(&branch) {
            return;
        }
        let token = CancellationToken::new();
        let monitor = BranchMonitor::new(client.clone(), repo.clone(), config.clone());
        let vm_name = object.name_any();
        let spawned_token = token.clone();
        tokio::spawn(async move {
            monitor.run(branch, vm_name, namespace, spawned_token).await;
        });
        monitors.insert(branch, token);
        info!(%branch, "spawned branch probe monitor");
    } else if let Some(token) = monitors.remove(&branch) {
        token.cancel();
        info!(%branch, "cancelled branch probe monitor");
    }
}

fn delete_vm(config: &Arc<Config>, monitors: &mut HashMap<BranchId, CancellationToken>, object: &kube::core::DynamicObject) {
    let Some(namespace) = object.metadata.namespace.as_deref() else { return };
    let Some(branch) = branch_id_from_namespace(namespace, &config.namespace_prefix) else { return };
    if let Some(token) = monitors.remove(&branch) {
        token.cancel();
        info!(%branch, "cancelled branch probe monitor on VM delete");
    }
}
