//! Per-branch probe loop: the unit of work spawned and cancelled by the VM watcher.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::repo::BranchRepo;
use crate::error::Result;
use crate::ids::BranchId;

use super::probe::{probe_all, ServiceEndpoints};
use super::status::{apply_transition, derive_status, has_active_resize, TransitionContext};
use super::vm;

pub struct BranchMonitor<R: BranchRepo> {
    client: Client,
    repo: Arc<R>,
    config: Arc<Config>,
}

impl<R: BranchRepo> BranchMonitor<R> {
    pub fn new(client: Client, repo: Arc<R>, config: Arc<Config>) -> Self {
        Self { client, repo, config }
    }

    /// Run the probe loop for one branch until cancelled. `vm_name`/`vm_namespace`
    /// identify the KubeVirt VirtualMachine object that triggered this monitor.
    #[instrument(skip(self, token), fields(%branch, %vm_namespace))]
    pub async fn run(&self, branch: BranchId, vm_name: String, vm_namespace: String, token: CancellationToken) {
        let mut status_since = Utc::now();
        let mut last_status = match self.repo.get(branch).await {
            Ok(b) => b.status,
            Err(e) => {
                warn!("branch monitor exiting, couldn't load branch: {e}");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("branch monitor cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.config.probe_interval) => {}
            }

            match self.tick(branch, &vm_name, &vm_namespace, last_status, status_since).await {
                Ok(Some(new_status)) => {
                    if new_status != last_status {
                        status_since = Utc::now();
                        last_status = new_status;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("branch monitor tick failed: {e}"),
            }
        }
    }

    async fn tick(
        &self,
        branch: BranchId,
        vm_name: &str,
        vm_namespace: &str,
        current: crate::db::models::BranchStatus,
        status_since: chrono::DateTime<Utc>,
    ) -> Result<Option<crate::db::models::BranchStatus>> {
        let branch_row = self.repo.get(branch).await?;

        let vm = vm::read_vm(&self.client, vm_namespace, vm_name).await?;
        let phase = vm.as_ref().and_then(vm::printable_status);
        let vm_errored = phase.as_deref().map(vm::is_errored).unwrap_or(false);

        let storage_enabled = branch_row.storage_size > 0;
        let endpoints = ServiceEndpoints::for_namespace(&self.config.branch_namespace(&branch), storage_enabled);
        let probes = probe_all(&endpoints, self.config.probe_timeout, vm_errored).await;
        let derived = derive_status(&probes);

        let ctx = TransitionContext {
            has_active_resize: has_active_resize(&branch_row.resize_statuses.0),
            status_since,
            grace_period: self.grace_period_for(current),
        };

        let new_status = apply_transition(current, derived, &ctx, Utc::now());
        if new_status != current {
            self.repo.update_status(branch, new_status).await?;
            info!(from = ?current, to = ?new_status, "branch status transition");
            return Ok(Some(new_status));
        }
        Ok(None)
    }

    fn grace_period_for(&self, current: crate::db::models::BranchStatus) -> Duration {
        use crate::db::models::BranchStatus::*;
        match current {
            Creating => self.config.creating_error_grace_period,
            Starting => self.config.starting_error_grace_period,
            _ => Duration::from_secs(0),
        }
    }
}
