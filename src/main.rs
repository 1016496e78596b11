//! Vela Core Entry Point
//!
//! Starts the background loops for the five core components: C1 is invoked inline by
//! C4 and by whatever out-of-scope API layer drives branch creation, C2 watches
//! VirtualMachine objects and reconciles branch status, C3 watches PVC resize events
//! and sweeps timed-out resizes, C4 ticks the backup scheduler, and C5 is linked in by
//! C3 and C4 rather than run on its own.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vela_core::config::{Cli, Config};
use vela_core::db::{self, PgBackupRepo, PgBranchRepo, PgOrganizationRepo, PgProjectRepo, PgResourceLimitRepo};
use vela_core::error::Result;
use vela_core::quota::QuotaEngine;
use vela_core::{backup, reconciler, resize, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    let otel_enabled = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();
    if otel_enabled {
        let otel_layer = telemetry::init_telemetry(&registry);
        registry.with(otel_layer).init();
        info!("OpenTelemetry tracing initialized");
    } else {
        registry.init();
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }

    info!("Starting Vela Core v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = Arc::new(Config::load(cli)?);

    let pool = db::connect(&config.database_url).await?;
    let client = kube::Client::try_default().await?;
    info!("connected to Kubernetes cluster and metadata store");

    let branches = Arc::new(PgBranchRepo::new(pool.clone()));
    let projects = Arc::new(PgProjectRepo::new(pool.clone()));
    let organizations = Arc::new(PgOrganizationRepo::new(pool.clone()));
    let backups = Arc::new(PgBackupRepo::new(pool.clone()));
    let limits_repo = PgResourceLimitRepo::new(pool.clone());
    let quota = Arc::new(QuotaEngine::new(limits_repo));

    let shutdown = CancellationToken::new();

    let reconciler_task = tokio::spawn(reconciler::run_vm_watch(
        client.clone(),
        branches.clone(),
        config.clone(),
        shutdown.clone(),
    ));

    let resize_watcher_task = tokio::spawn(resize::run_resize_watcher(
        client.clone(),
        branches.clone(),
        quota.clone(),
        shutdown.clone(),
    ));

    let resize_timeout_task = tokio::spawn(resize::run_timeout_sweeper(
        branches.clone(),
        config.resize_timeout_sweep_interval,
        config.resize_timeout,
        shutdown.clone(),
    ));

    let backup_task = tokio::spawn(backup::run_backup_scheduler(
        client.clone(),
        branches.clone(),
        backups.clone(),
        projects.clone(),
        organizations.clone(),
        config.clone(),
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await.map_err(vela_core::error::OperationError::Io)?;
    info!("shutdown signal received, stopping background loops");
    shutdown.cancel();

    let _ = tokio::join!(reconciler_task, resize_watcher_task, resize_timeout_task, backup_task);

    telemetry::shutdown_telemetry();
    Ok(())
}
