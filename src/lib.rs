//! Vela: a control plane for provisioning and operating Postgres branch database
//! environments on Kubernetes.
//!
//! The five core components live in their own modules: snapshot/clone orchestration
//! (`snapshot`), branch status reconciliation (`reconciler`), resize coordination
//! (`resize`), the backup scheduler (`backup`), and the hierarchical quota engine
//! (`quota`). `db` holds the persistence layer shared by all of them.

pub mod backup;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod ids;
pub mod quota;
pub mod reconciler;
pub mod resize;
pub mod snapshot;
pub mod telemetry;

pub use error::{OperationError, Result};
