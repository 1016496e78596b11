//! Row types for the metadata store. Field shapes follow the entity list, mirroring the
//! `sqlx::FromRow` style the rest of this crate's persistence layer uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ApiKeyId, BackupScheduleId, BranchId, OrganizationId, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ResourceType {
    MilliVcpu,
    Ram,
    Iops,
    DatabaseSize,
    StorageSize,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::MilliVcpu,
        ResourceType::Ram,
        ResourceType::Iops,
        ResourceType::DatabaseSize,
        ResourceType::StorageSize,
    ];
}

/// Limit tier a [`ResourceLimit`] row applies at. The original source conflated
/// org-level and project-level rows into a single `EntityType::project` table keyed by
/// an optional `project_id`; this keeps that storage shape but names tiers explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum EntityType {
    System,
    Organization,
    Project,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ResourceLimit {
    pub entity_type: EntityType,
    pub org_id: Option<OrganizationId>,
    pub project_id: Option<ProjectId>,
    pub resource: ResourceType,
    pub max_per_branch: Option<i64>,
    pub max_total: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct BranchProvisioning {
    pub branch_id: BranchId,
    pub resource: ResourceType,
    pub amount: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum ProvisioningLogAction {
    Create,
    Update,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProvisioningLog {
    pub branch_id: BranchId,
    pub resource: ResourceType,
    pub action: ProvisioningLogAction,
    pub amount: i64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    ActiveHealthy,
    ActiveUnhealthy,
    Stopped,
    Starting,
    Stopping,
    Pausing,
    Paused,
    Resuming,
    Restarting,
    Creating,
    Updating,
    Deleting,
    Resizing,
    Unknown,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchResizeStatus {
    None,
    Pending,
    Resizing,
    FilesystemResizePending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeService {
    DatabaseCpuResize,
    DatabaseMemoryResize,
    DatabaseIopsResize,
    DatabaseDiskResize,
    StorageApiDiskResize,
}

impl ResizeService {
    pub const RESIZE_TIMEOUT_SERVICES: [ResizeService; 5] = [
        ResizeService::DatabaseCpuResize,
        ResizeService::DatabaseMemoryResize,
        ResizeService::DatabaseIopsResize,
        ResizeService::DatabaseDiskResize,
        ResizeService::StorageApiDiskResize,
    ];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeStatusEntry {
    pub status: BranchResizeStatus,
    pub timestamp: DateTime<Utc>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub max_backups: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub env_type: Option<String>,
    pub max_backups: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub project_id: ProjectId,
    pub name: String,
    pub status: BranchStatus,
    /// JSONB map of service name -> [`ResizeStatusEntry`], decoded leniently so unknown
    /// keys from a newer schema revision are simply ignored.
    pub resize_statuses: sqlx::types::Json<std::collections::HashMap<String, ResizeStatusEntry>>,
    pub database_size: i64,
    pub storage_size: i64,
    pub milli_vcpu: i64,
    pub memory_bytes: i64,
    pub iops: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PgbouncerConfig {
    pub branch_id: BranchId,
    pub admin_password_ciphertext: String,
    pub passphrase: String,
    pub pool_mode: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct BranchApiKey {
    pub id: ApiKeyId,
    pub branch_id: BranchId,
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub id: BackupScheduleId,
    pub branch_id: Option<BranchId>,
    pub organization_id: Option<OrganizationId>,
    pub env_type: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct BackupScheduleRow {
    pub schedule_id: BackupScheduleId,
    pub row_index: i32,
    pub interval: i32,
    pub unit: String,
    pub retention: i32,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct NextBackup {
    pub branch_id: BranchId,
    pub row_index: i32,
    pub next_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct BackupEntry {
    pub id: i64,
    pub branch_id: BranchId,
    pub row_index: i32,
    pub created_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub snapshot_name: String,
    pub snapshot_namespace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum BackupLogAction {
    Taken,
    #[sqlx(rename = "manual-create")]
    #[serde(rename = "manual-create")]
    ManualCreate,
    #[sqlx(rename = "manual-delete")]
    #[serde(rename = "manual-delete")]
    ManualDelete,
    Delete,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct BackupLog {
    pub branch_id: BranchId,
    pub row_index: i32,
    pub action: BackupLogAction,
    pub created_at: DateTime<Utc>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ResourceUsageMinute {
    pub branch_id: BranchId,
    pub minute: DateTime<Utc>,
    pub resource: ResourceType,
    pub amount: i64,
}
