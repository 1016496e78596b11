//! Synchronous resize request handling: admission against C5, per-service status
//! bookkeeping, and dispatch of the k8s patches that carry the resize out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use kube::Client;
use tracing::info;

use crate::config::Config;
use crate::db::models::{BranchResizeStatus, BranchStatus, ResizeService};
use crate::db::repo::{BranchRepo, ResourceLimitRepo};
use crate::error::Result;
use crate::ids::BranchId;
use crate::quota::QuotaEngine;
use crate::snapshot::k8s as snapshot_k8s;

use super::admission::{admit_resize, reject_contraction, RejectedResize, ResizeRequest};
use super::iops::IopsBackend;
use super::k8s as resize_k8s;
use super::status;

pub struct ResizeCoordinator<R: BranchRepo, L: ResourceLimitRepo, I: IopsBackend> {
    client: Client,
    config: Arc<Config>,
    branches: Arc<R>,
    quota: QuotaEngine<L>,
    iops_backend: Arc<I>,
}

impl<R: BranchRepo, L: ResourceLimitRepo, I: IopsBackend> ResizeCoordinator<R, L, I> {
    pub fn new(client: Client, config: Arc<Config>, branches: Arc<R>, quota: QuotaEngine<L>, iops_backend: Arc<I>) -> Self {
        Self { client, config, branches, quota, iops_backend }
    }

    /// Admit and execute a resize request for one branch. Returns the set of
    /// service/field keys that were set PENDING, or the list of resources that
    /// exceeded their quota if the request was rejected.
    pub async fn resize(
        &self,
        org: crate::ids::OrganizationId,
        project: crate::ids::ProjectId,
        branch: BranchId,
        request: ResizeRequest,
    ) -> Result<Result<Vec<String>, Vec<RejectedResize>>> {
        let branch_row = self.branches.get(branch).await?;
        let current: HashMap<_, _> = [
            (crate::db::models::ResourceType::DatabaseSize, branch_row.database_size),
            (crate::db::models::ResourceType::StorageSize, branch_row.storage_size),
            (crate::db::models::ResourceType::MilliVcpu, branch_row.milli_vcpu),
            (crate::db::models::ResourceType::Ram, branch_row.memory_bytes),
            (crate::db::models::ResourceType::Iops, branch_row.iops),
        ]
        .into_iter()
        .collect();

        reject_contraction(&current, &request)?;

        let rejected = admit_resize(&self.quota, org, project, branch, &current, &request).await?;
        if !rejected.is_empty() {
            return Ok(Err(rejected));
        }

        let now = Utc::now();
        let mut statuses = branch_row.resize_statuses.0.clone();
        let mut touched = Vec::new();

        let field_services: [(bool, ResizeService); 5] = [
            (request.database_size.is_some(), ResizeService::DatabaseDiskResize),
            (request.storage_size.is_some(), ResizeService::StorageApiDiskResize),
            (request.milli_vcpu.is_some(), ResizeService::DatabaseCpuResize),
            (request.memory_bytes.is_some(), ResizeService::DatabaseMemoryResize),
            (request.iops.is_some(), ResizeService::DatabaseIopsResize),
        ];
        for (changed, service) in field_services {
            if changed {
                status::set_pending(&mut statuses, service, now);
                touched.push(status::service_key(service).to_string());
            } else {
                let key = status::service_key(service);
                if statuses.get(key).map(|e| e.status) == Some(BranchResizeStatus::Pending) {
                    status::clear(&mut statuses, service);
                }
            }
        }

        self.branches.update_resize_statuses(branch, statuses).await?;
        if branch_row.status != BranchStatus::Resizing {
            self.branches.update_status(branch, BranchStatus::Resizing).await?;
        }

        self.execute(branch, &request).await?;
        Ok(Ok(touched))
    }

    async fn execute(&self, branch: BranchId, request: &ResizeRequest) -> Result<()> {
        let namespace = self.config.branch_namespace(&branch);
        let branch_lower = branch.to_string().to_lowercase();

        if let Some(size) = request.database_size {
            snapshot_k8s::patch_pvc_storage_request(&self.client, &namespace, &format!("{branch_lower}-pvc"), size).await?;
        }
        if let Some(size) = request.storage_size {
            snapshot_k8s::patch_pvc_storage_request(&self.client, &namespace, &format!("{branch_lower}-storage-pvc"), size).await?;
        }
        if let Some(milli_vcpu) = request.milli_vcpu {
            resize_k8s::patch_vm_cpu(
                &self.client,
                &namespace,
                &branch_lower,
                milli_vcpu,
                self.config.cpu_patch_retry_attempts,
                self.config.cpu_patch_retry_delay,
            )
            .await?;
        }
        if let Some(memory_bytes) = request.memory_bytes {
            let branch_row = self.branches.get(branch).await?;
            resize_k8s::patch_vm_memory(
                &self.client,
                &namespace,
                &branch_lower,
                memory_bytes,
                self.config.memory_slot_size_bytes,
                self.config.memory_max_slots,
                branch_row.memory_bytes,
            )
            .await?;
        }
        if let Some(iops) = request.iops {
            self.iops_backend.set_iops(branch, iops).await?;
            self.quota.commit_provisioning(branch, crate::db::models::ResourceType::Iops, iops, Some("resize".to_string())).await?;
            let mut statuses = self.branches.get(branch).await?.resize_statuses.0;
            status::advance(&mut statuses, ResizeService::DatabaseIopsResize, BranchResizeStatus::Completed, Utc::now());
            self.branches.update_resize_statuses(branch, statuses).await?;
            info!(%branch, iops, "committed IOPS resize synchronously");
        }
        Ok(())
    }
}
