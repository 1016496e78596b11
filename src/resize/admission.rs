//! Synchronous admission check: a resize request is admitted only if every changed
//! resource's new total fits within its effective quota tier, computed with the
//! branch's own current allocation excluded (it's being replaced, not added on top of).

use std::collections::HashMap;

use crate::db::models::ResourceType;
use crate::db::repo::ResourceLimitRepo;
use crate::error::{OperationError, Result};
use crate::ids::{BranchId, OrganizationId, ProjectId};
use crate::quota::QuotaEngine;

#[derive(Debug, Clone, Default)]
pub struct ResizeRequest {
    pub database_size: Option<i64>,
    pub storage_size: Option<i64>,
    pub milli_vcpu: Option<i64>,
    pub memory_bytes: Option<i64>,
    pub iops: Option<i64>,
}

impl ResizeRequest {
    fn targets(&self) -> HashMap<ResourceType, i64> {
        let mut map = HashMap::new();
        if let Some(v) = self.database_size {
            map.insert(ResourceType::DatabaseSize, v);
        }
        if let Some(v) = self.storage_size {
            map.insert(ResourceType::StorageSize, v);
        }
        if let Some(v) = self.milli_vcpu {
            map.insert(ResourceType::MilliVcpu, v);
        }
        if let Some(v) = self.memory_bytes {
            map.insert(ResourceType::Ram, v);
        }
        if let Some(v) = self.iops {
            map.insert(ResourceType::Iops, v);
        }
        map
    }
}

/// Reject a request whose storage fields would shrink an existing allocation; the CSI
/// resize controller has no contraction path.
pub fn reject_contraction(current: &HashMap<ResourceType, i64>, request: &ResizeRequest) -> Result<()> {
    if let Some(new_size) = request.database_size {
        let existing = current.get(&ResourceType::DatabaseSize).copied().unwrap_or(0);
        if new_size < existing {
            return Err(OperationError::validation("database_size cannot be decreased"));
        }
    }
    if let Some(new_size) = request.storage_size {
        let existing = current.get(&ResourceType::StorageSize).copied().unwrap_or(0);
        if new_size < existing {
            return Err(OperationError::validation("storage_size cannot be decreased"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedResize {
    pub resource: ResourceType,
    pub message: String,
}

pub async fn admit_resize<R: ResourceLimitRepo>(
    engine: &QuotaEngine<R>,
    org: OrganizationId,
    project: ProjectId,
    branch: BranchId,
    current: &HashMap<ResourceType, i64>,
    request: &ResizeRequest,
) -> Result<Vec<RejectedResize>> {
    let targets = request.targets();
    if targets.is_empty() {
        return Ok(Vec::new());
    }
    let exceeded = engine.check_resource_limits(org, project, branch, &targets, Some(current)).await?;
    Ok(exceeded
        .into_iter()
        .map(|e| RejectedResize {
            resource: e.resource,
            message: format!(
                "resource {:?} exceeds limit at effective tier (requested {}, remaining {})",
                e.resource, e.requested, e.remaining
            ),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contraction_is_rejected() {
        let mut current = HashMap::new();
        current.insert(ResourceType::DatabaseSize, 100);
        let request = ResizeRequest { database_size: Some(50), ..Default::default() };
        assert!(reject_contraction(&current, &request).is_err());
    }

    #[test]
    fn growth_is_accepted() {
        let mut current = HashMap::new();
        current.insert(ResourceType::DatabaseSize, 100);
        let request = ResizeRequest { database_size: Some(200), ..Default::default() };
        assert!(reject_contraction(&current, &request).is_ok());
    }
}
