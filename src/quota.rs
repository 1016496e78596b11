//! Hierarchical quota engine (C5).
//!
//! Effective per-branch limits are the tightest of three constraints: a per-branch cap
//! resolved project → organization → system → hardcoded default, and the organization's
//! and project's remaining total capacity after subtracting current allocations. Grounded
//! in `get_effective_branch_limits` (original_source/src/api/_util/resourcelimit.py),
//! extended with an explicit system tier per the design note that the python source
//! skips it.

use std::collections::HashMap;

use crate::db::models::ResourceType;
use crate::db::repo::ResourceLimitRepo;
use crate::error::Result;
use crate::ids::{BranchId, OrganizationId, ProjectId};

const DEFAULT_PER_BRANCH: i64 = 32_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimit {
    pub per_branch: i64,
    pub remaining_org: i64,
    pub remaining_project: i64,
}

impl EffectiveLimit {
    pub fn effective(&self) -> i64 {
        self.per_branch.min(self.remaining_org).min(self.remaining_project).max(0)
    }
}

/// A requested resource amount exceeding its effective limit, with the residual capacity
/// the caller could still admit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceededLimit {
    pub resource: ResourceType,
    pub requested: i64,
    pub remaining: i64,
}

pub struct QuotaEngine<R: ResourceLimitRepo> {
    repo: R,
}

impl<R: ResourceLimitRepo> QuotaEngine<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Compute the effective limit for every resource type for a branch under the given
    /// organization/project, optionally excluding the branch's own current allocation
    /// (used by the resize coordinator when checking a delta against remaining headroom).
    pub async fn effective_branch_limits(
        &self,
        org: OrganizationId,
        project: ProjectId,
        exclude_branch_allocation: Option<&HashMap<ResourceType, i64>>,
    ) -> Result<HashMap<ResourceType, EffectiveLimit>> {
        let system_limits = self.repo.system_limits().await?;
        let org_limits = self.repo.org_limits(org).await?;
        let project_limits = self.repo.project_limits(org, project).await?;
        let org_allocations = self.repo.org_allocations(org).await?;
        let project_allocations = self.repo.project_allocations(project).await?;

        let mut result = HashMap::new();
        for resource in ResourceType::ALL {
            let per_branch = project_limits
                .get(&resource)
                .and_then(|l| l.max_per_branch)
                .or_else(|| org_limits.get(&resource).and_then(|l| l.max_per_branch))
                .or_else(|| system_limits.get(&resource).and_then(|l| l.max_per_branch))
                .unwrap_or(DEFAULT_PER_BRANCH);

            let excluded = exclude_branch_allocation.and_then(|m| m.get(&resource)).copied().unwrap_or(0);

            let remaining_org = match org_limits.get(&resource).and_then(|l| l.max_total) {
                Some(max_total) => {
                    let used = org_allocations.get(&resource).copied().unwrap_or(0) - excluded;
                    max_total - used
                }
                None => i64::MAX,
            };
            let remaining_project = match project_limits.get(&resource).and_then(|l| l.max_total) {
                Some(max_total) => {
                    let used = project_allocations.get(&resource).copied().unwrap_or(0) - excluded;
                    max_total - used
                }
                None => i64::MAX,
            };

            result.insert(resource, EffectiveLimit { per_branch, remaining_org, remaining_project });
        }
        Ok(result)
    }

    /// Check a provisioning request against effective limits, returning every resource
    /// that would exceed its headroom. Empty means the request is admissible.
    pub async fn check_resource_limits(
        &self,
        org: OrganizationId,
        project: ProjectId,
        _branch: BranchId,
        request: &HashMap<ResourceType, i64>,
        exclude_branch_allocation: Option<&HashMap<ResourceType, i64>>,
    ) -> Result<Vec<ExceededLimit>> {
        let limits = self
            .effective_branch_limits(org, project, exclude_branch_allocation)
            .await?;

        let mut exceeded = Vec::new();
        for (&resource, &requested) in request {
            let limit = limits.get(&resource).copied().unwrap_or(EffectiveLimit {
                per_branch: DEFAULT_PER_BRANCH,
                remaining_org: i64::MAX,
                remaining_project: i64::MAX,
            });
            let effective = limit.effective();
            if requested > effective {
                exceeded.push(ExceededLimit { resource, requested, remaining: effective });
            }
        }
        Ok(exceeded)
    }

    pub async fn commit_provisioning(
        &self,
        branch: BranchId,
        resource: ResourceType,
        amount: i64,
        reason: Option<String>,
    ) -> Result<()> {
        self.repo.upsert_branch_provisioning(branch, resource, amount, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLimitRepo {
        system: HashMap<ResourceType, crate::db::models::ResourceLimit>,
        org: HashMap<ResourceType, crate::db::models::ResourceLimit>,
        project: HashMap<ResourceType, crate::db::models::ResourceLimit>,
        org_alloc: HashMap<ResourceType, i64>,
        project_alloc: HashMap<ResourceType, i64>,
        committed: Mutex<Vec<(BranchId, ResourceType, i64)>>,
    }

    #[async_trait]
    impl ResourceLimitRepo for FakeLimitRepo {
        async fn system_limits(&self) -> Result<HashMap<ResourceType, crate::db::models::ResourceLimit>> {
            Ok(self.system.clone())
        }
        async fn org_limits(&self, _org: OrganizationId) -> Result<HashMap<ResourceType, crate::db::models::ResourceLimit>> {
            Ok(self.org.clone())
        }
        async fn project_limits(
            &self,
            _org: OrganizationId,
            _project: ProjectId,
        ) -> Result<HashMap<ResourceType, crate::db::models::ResourceLimit>> {
            Ok(self.project.clone())
        }
        async fn org_allocations(&self, _org: OrganizationId) -> Result<HashMap<ResourceType, i64>> {
            Ok(self.org_alloc.clone())
        }
        async fn project_allocations(&self, _project: ProjectId) -> Result<HashMap<ResourceType, i64>> {
            Ok(self.project_alloc.clone())
        }
        async fn upsert_branch_provisioning(
            &self,
            branch: BranchId,
            resource: ResourceType,
            amount: i64,
            _reason: Option<String>,
        ) -> Result<()> {
            self.committed.lock().unwrap().push((branch, resource, amount));
            Ok(())
        }
    }

    fn org() -> OrganizationId { OrganizationId::new() }
    fn project() -> ProjectId { ProjectId::new() }
    fn branch() -> BranchId { BranchId::new() }

    #[tokio::test]
    async fn falls_back_to_default_per_branch_limit() {
        let engine = QuotaEngine::new(FakeLimitRepo::default());
        let limits = engine.effective_branch_limits(org(), project(), None).await.unwrap();
        assert_eq!(limits[&ResourceType::MilliVcpu].effective(), DEFAULT_PER_BRANCH);
    }

    #[tokio::test]
    async fn org_total_caps_effective_limit_below_per_branch_default() {
        let mut repo = FakeLimitRepo::default();
        repo.org.insert(
            ResourceType::Iops,
            crate::db::models::ResourceLimit {
                entity_type: crate::db::models::EntityType::Organization,
                org_id: None,
                project_id: None,
                resource: ResourceType::Iops,
                max_per_branch: None,
                max_total: Some(1000),
            },
        );
        repo.org_alloc.insert(ResourceType::Iops, 900);
        let engine = QuotaEngine::new(repo);
        let limits = engine.effective_branch_limits(org(), project(), None).await.unwrap();
        assert_eq!(limits[&ResourceType::Iops].effective(), 100);
    }

    #[tokio::test]
    async fn request_exceeding_remaining_is_reported() {
        let mut repo = FakeLimitRepo::default();
        repo.project.insert(
            ResourceType::DatabaseSize,
            crate::db::models::ResourceLimit {
                entity_type: crate::db::models::EntityType::Project,
                org_id: None,
                project_id: None,
                resource: ResourceType::DatabaseSize,
                max_per_branch: Some(500),
                max_total: None,
            },
        );
        let engine = QuotaEngine::new(repo);
        let mut request = HashMap::new();
        request.insert(ResourceType::DatabaseSize, 600);
        let exceeded = engine
            .check_resource_limits(org(), project(), branch(), &request, None)
            .await
            .unwrap();
        assert_eq!(exceeded.len(), 1);
        assert_eq!(exceeded[0].remaining, 500);
    }

    #[tokio::test]
    async fn excluding_current_allocation_frees_headroom_for_resize() {
        let mut repo = FakeLimitRepo::default();
        repo.org.insert(
            ResourceType::StorageSize,
            crate::db::models::ResourceLimit {
                entity_type: crate::db::models::EntityType::Organization,
                org_id: None,
                project_id: None,
                resource: ResourceType::StorageSize,
                max_per_branch: None,
                max_total: Some(1000),
            },
        );
        repo.org_alloc.insert(ResourceType::StorageSize, 1000);
        let engine = QuotaEngine::new(repo);

        let mut current = HashMap::new();
        current.insert(ResourceType::StorageSize, 400);
        let limits = engine
            .effective_branch_limits(org(), project(), Some(&current))
            .await
            .unwrap();
        assert_eq!(limits[&ResourceType::StorageSize].effective(), 400);
    }
}
