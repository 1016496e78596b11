//! Persistence layer: `sqlx`-backed repositories over the metadata store.

pub mod models;
pub mod repo;

pub use models::*;
pub use repo::{
    BackupRepo, BranchRepo, OrganizationRepo, PgBackupRepo, PgBranchRepo, PgOrganizationRepo,
    PgProjectRepo, PgResourceLimitRepo, ProjectRepo, ResourceLimitRepo,
};

pub async fn connect(database_url: &str) -> crate::error::Result<sqlx::PgPool> {
    Ok(sqlx::postgres::PgPoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await?)
}
