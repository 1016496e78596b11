//! Storage-backend IOPS propagation.
//!
//! IOPS throttling lives in the storage backend, outside this crate's boundary — this
//! trait is the narrow interface C3 calls through, following the same
//! externally-owned-collaborator pattern the teacher uses for `StorageProviderTrait`
//! (`src/backup/providers/mod.rs`).

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::BranchId;

#[async_trait]
pub trait IopsBackend: Send + Sync {
    async fn set_iops(&self, branch: BranchId, iops: i64) -> Result<()>;
}

/// Backend used when no storage-side IOPS enforcement is wired up; IOPS changes are
/// accepted and recorded in `BranchProvisioning` without a downstream call.
pub struct NoopIopsBackend;

#[async_trait]
impl IopsBackend for NoopIopsBackend {
    async fn set_iops(&self, _branch: BranchId, _iops: i64) -> Result<()> {
        Ok(())
    }
}
