//! Repository traits over the metadata store.
//!
//! Each trait is implemented once against a live `PgPool` with hand-written SQL (no
//! compile-time `query!` macro, since the crate is built without a reachable database),
//! and once as an in-memory fake for tests, following the `StorageProviderTrait` style
//! used elsewhere in this codebase for swappable backends.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::error::Result;
use crate::ids::{BackupScheduleId, BranchId, OrganizationId, ProjectId};

use super::models::*;

#[async_trait]
pub trait ResourceLimitRepo: Send + Sync {
    async fn system_limits(&self) -> Result<HashMap<ResourceType, ResourceLimit>>;
    async fn org_limits(&self, org: OrganizationId) -> Result<HashMap<ResourceType, ResourceLimit>>;
    async fn project_limits(
        &self,
        org: OrganizationId,
        project: ProjectId,
    ) -> Result<HashMap<ResourceType, ResourceLimit>>;
    async fn org_allocations(&self, org: OrganizationId) -> Result<HashMap<ResourceType, i64>>;
    async fn project_allocations(&self, project: ProjectId) -> Result<HashMap<ResourceType, i64>>;
    async fn upsert_branch_provisioning(
        &self,
        branch: BranchId,
        resource: ResourceType,
        amount: i64,
        reason: Option<String>,
    ) -> Result<()>;
}

#[async_trait]
pub trait BranchRepo: Send + Sync {
    async fn get(&self, id: BranchId) -> Result<Branch>;
    async fn list_active_healthy(&self) -> Result<Vec<Branch>>;
    async fn list_with_resize_statuses(&self) -> Result<Vec<Branch>>;
    async fn project_of(&self, branch: BranchId) -> Result<ProjectId>;
    async fn update_status(&self, branch: BranchId, status: BranchStatus) -> Result<()>;
    async fn update_resize_statuses(
        &self,
        branch: BranchId,
        statuses: HashMap<String, ResizeStatusEntry>,
    ) -> Result<()>;
}

#[async_trait]
pub trait ProjectRepo: Send + Sync {
    async fn get(&self, id: ProjectId) -> Result<Project>;
}

#[async_trait]
pub trait OrganizationRepo: Send + Sync {
    async fn get(&self, id: OrganizationId) -> Result<Organization>;
}

#[async_trait]
pub trait BackupRepo: Send + Sync {
    async fn schedule_for_branch(&self, branch: BranchId) -> Result<Option<BackupSchedule>>;
    async fn schedule_for_org_env(
        &self,
        org: OrganizationId,
        env_type: &str,
    ) -> Result<Option<BackupSchedule>>;
    async fn schedule_for_org(&self, org: OrganizationId) -> Result<Option<BackupSchedule>>;
    async fn rows_for_schedule(&self, schedule: BackupScheduleId) -> Result<Vec<BackupScheduleRow>>;
    async fn next_backup(&self, branch: BranchId, row_index: i32) -> Result<Option<NextBackup>>;
    async fn ensure_next_backup(&self, branch: BranchId, row_index: i32, next_at: chrono::DateTime<Utc>) -> Result<()>;
    async fn advance_next_backup(&self, branch: BranchId, row_index: i32, next_at: chrono::DateTime<Utc>) -> Result<()>;
    async fn due_next_backups(&self, now: chrono::DateTime<Utc>) -> Result<Vec<NextBackup>>;
    async fn insert_entry(&self, entry: BackupEntry) -> Result<i64>;
    async fn entries_for_row(&self, branch: BranchId, row_index: i32) -> Result<Vec<BackupEntry>>;
    async fn entries_for_branch(&self, branch: BranchId) -> Result<Vec<BackupEntry>>;
    async fn delete_entry(&self, id: i64) -> Result<()>;
    async fn append_log(&self, log: BackupLog) -> Result<()>;
}

pub struct PgResourceLimitRepo {
    pool: PgPool,
}

impl PgResourceLimitRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceLimitRepo for PgResourceLimitRepo {
    async fn system_limits(&self) -> Result<HashMap<ResourceType, ResourceLimit>> {
        let rows: Vec<ResourceLimit> = sqlx::query_as(
            "SELECT entity_type, org_id, project_id, resource, max_per_branch, max_total \
             FROM resource_limits WHERE entity_type = 'system'",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.resource, r)).collect())
    }

    async fn org_limits(&self, org: OrganizationId) -> Result<HashMap<ResourceType, ResourceLimit>> {
        let rows: Vec<ResourceLimit> = sqlx::query_as(
            "SELECT entity_type, org_id, project_id, resource, max_per_branch, max_total \
             FROM resource_limits \
             WHERE entity_type = 'organization' AND org_id = $1 AND project_id IS NULL",
        )
        .bind(org)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.resource, r)).collect())
    }

    async fn project_limits(
        &self,
        org: OrganizationId,
        project: ProjectId,
    ) -> Result<HashMap<ResourceType, ResourceLimit>> {
        let rows: Vec<ResourceLimit> = sqlx::query_as(
            "SELECT entity_type, org_id, project_id, resource, max_per_branch, max_total \
             FROM resource_limits \
             WHERE entity_type = 'project' AND org_id = $1 AND project_id = $2",
        )
        .bind(org)
        .bind(project)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.resource, r)).collect())
    }

    async fn org_allocations(&self, org: OrganizationId) -> Result<HashMap<ResourceType, i64>> {
        let rows: Vec<(ResourceType, Option<i64>)> = sqlx::query_as(
            "SELECT bp.resource, SUM(bp.amount) \
             FROM branch_provisioning bp \
             JOIN branches b ON b.id = bp.branch_id \
             JOIN projects p ON p.id = b.project_id \
             WHERE p.organization_id = $1 \
             GROUP BY bp.resource",
        )
        .bind(org)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(r, sum)| (r, sum.unwrap_or(0))).collect())
    }

    async fn project_allocations(&self, project: ProjectId) -> Result<HashMap<ResourceType, i64>> {
        let rows: Vec<(ResourceType, Option<i64>)> = sqlx::query_as(
            "SELECT bp.resource, SUM(bp.amount) \
             FROM branch_provisioning bp \
             JOIN branches b ON b.id = bp.branch_id \
             WHERE b.project_id = $1 \
             GROUP BY bp.resource",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(r, sum)| (r, sum.unwrap_or(0))).collect())
    }

    async fn upsert_branch_provisioning(
        &self,
        branch: BranchId,
        resource: ResourceType,
        amount: i64,
        reason: Option<String>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT amount FROM branch_provisioning WHERE branch_id = $1 AND resource = $2",
        )
        .bind(branch)
        .bind(resource)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO branch_provisioning (branch_id, resource, amount, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (branch_id, resource) DO UPDATE SET amount = $3, updated_at = now()",
        )
        .bind(branch)
        .bind(resource)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        let action = if existing.is_some() {
            ProvisioningLogAction::Update
        } else {
            ProvisioningLogAction::Create
        };
        sqlx::query(
            "INSERT INTO provisioning_log (branch_id, resource, action, amount, reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(branch)
        .bind(resource)
        .bind(action)
        .bind(amount)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

pub struct PgBranchRepo {
    pool: PgPool,
}

impl PgBranchRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BranchRepo for PgBranchRepo {
    async fn get(&self, id: BranchId) -> Result<Branch> {
        sqlx::query_as("SELECT * FROM branches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| crate::error::OperationError::not_found(format!("branch {id}")))
    }

    async fn list_active_healthy(&self) -> Result<Vec<Branch>> {
        Ok(sqlx::query_as("SELECT * FROM branches WHERE status = 'ACTIVE_HEALTHY'")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_with_resize_statuses(&self) -> Result<Vec<Branch>> {
        Ok(sqlx::query_as("SELECT * FROM branches WHERE resize_statuses != '{}'::jsonb")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn project_of(&self, branch: BranchId) -> Result<ProjectId> {
        let row: (ProjectId,) = sqlx::query_as("SELECT project_id FROM branches WHERE id = $1")
            .bind(branch)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| crate::error::OperationError::not_found(format!("branch {branch}")))?;
        Ok(row.0)
    }

    async fn update_status(&self, branch: BranchId, status: BranchStatus) -> Result<()> {
        sqlx::query("UPDATE branches SET status = $2, updated_at = now() WHERE id = $1")
            .bind(branch)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_resize_statuses(
        &self,
        branch: BranchId,
        statuses: HashMap<String, ResizeStatusEntry>,
    ) -> Result<()> {
        sqlx::query("UPDATE branches SET resize_statuses = $2, updated_at = now() WHERE id = $1")
            .bind(branch)
            .bind(sqlx::types::Json(statuses))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PgProjectRepo {
    pool: PgPool,
}

impl PgProjectRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepo for PgProjectRepo {
    async fn get(&self, id: ProjectId) -> Result<Project> {
        sqlx::query_as("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| crate::error::OperationError::not_found(format!("project {id}")))
    }
}

pub struct PgOrganizationRepo {
    pool: PgPool,
}

impl PgOrganizationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepo for PgOrganizationRepo {
    async fn get(&self, id: OrganizationId) -> Result<Organization> {
        sqlx::query_as("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| crate::error::OperationError::not_found(format!("organization {id}")))
    }
}

pub struct PgBackupRepo {
    pool: PgPool,
}

impl PgBackupRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BackupRepo for PgBackupRepo {
    async fn schedule_for_branch(&self, branch: BranchId) -> Result<Option<BackupSchedule>> {
        Ok(sqlx::query_as("SELECT * FROM backup_schedules WHERE branch_id = $1")
            .bind(branch)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn schedule_for_org_env(
        &self,
        org: OrganizationId,
        env_type: &str,
    ) -> Result<Option<BackupSchedule>> {
        Ok(sqlx::query_as(
            "SELECT * FROM backup_schedules WHERE organization_id = $1 AND env_type = $2 AND branch_id IS NULL",
        )
        .bind(org)
        .bind(env_type)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn schedule_for_org(&self, org: OrganizationId) -> Result<Option<BackupSchedule>> {
        Ok(sqlx::query_as(
            "SELECT * FROM backup_schedules WHERE organization_id = $1 AND env_type IS NULL AND branch_id IS NULL",
        )
        .bind(org)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn rows_for_schedule(&self, schedule: BackupScheduleId) -> Result<Vec<BackupScheduleRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM backup_schedule_rows WHERE schedule_id = $1 ORDER BY row_index",
        )
        .bind(schedule)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn next_backup(&self, branch: BranchId, row_index: i32) -> Result<Option<NextBackup>> {
        Ok(sqlx::query_as(
            "SELECT * FROM next_backups WHERE branch_id = $1 AND row_index = $2",
        )
        .bind(branch)
        .bind(row_index)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn ensure_next_backup(
        &self,
        branch: BranchId,
        row_index: i32,
        next_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO next_backups (branch_id, row_index, next_at) VALUES ($1, $2, $3) \
             ON CONFLICT (branch_id, row_index) DO NOTHING",
        )
        .bind(branch)
        .bind(row_index)
        .bind(next_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn advance_next_backup(
        &self,
        branch: BranchId,
        row_index: i32,
        next_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE next_backups SET next_at = $3 WHERE branch_id = $1 AND row_index = $2")
            .bind(branch)
            .bind(row_index)
            .bind(next_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn due_next_backups(&self, now: chrono::DateTime<Utc>) -> Result<Vec<NextBackup>> {
        Ok(sqlx::query_as("SELECT * FROM next_backups WHERE next_at <= $1")
            .bind(now)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_entry(&self, entry: BackupEntry) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO backup_entries (branch_id, row_index, created_at, size_bytes, snapshot_name, snapshot_namespace) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(entry.branch_id)
        .bind(entry.row_index)
        .bind(entry.created_at)
        .bind(entry.size_bytes)
        .bind(entry.snapshot_name)
        .bind(entry.snapshot_namespace)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn entries_for_row(&self, branch: BranchId, row_index: i32) -> Result<Vec<BackupEntry>> {
        Ok(sqlx::query_as(
            "SELECT * FROM backup_entries WHERE branch_id = $1 AND row_index = $2 ORDER BY created_at ASC",
        )
        .bind(branch)
        .bind(row_index)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn entries_for_branch(&self, branch: BranchId) -> Result<Vec<BackupEntry>> {
        Ok(sqlx::query_as("SELECT * FROM backup_entries WHERE branch_id = $1 ORDER BY created_at ASC")
            .bind(branch)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete_entry(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM backup_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_log(&self, log: BackupLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO backup_log (branch_id, row_index, action, created_at, detail) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(log.branch_id)
        .bind(log.row_index)
        .bind(log.action)
        .bind(log.created_at)
        .bind(log.detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
