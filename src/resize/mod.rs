//! C3: Resize Coordinator.
//!
//! Accepts resize deltas, admits them against the quota engine (C5), tracks per-service
//! progress through a priority lattice, drives PVC/VM patches, and reconciles progress
//! from PVC events with a periodic timeout sweep as a backstop.

mod admission;
mod coordinator;
mod iops;
mod k8s;
mod status;
mod timeout;
mod watcher;

pub use admission::{admit_resize, reject_contraction, RejectedResize, ResizeRequest};
pub use coordinator::ResizeCoordinator;
pub use iops::{IopsBackend, NoopIopsBackend};
pub use status::{advance, advances, aggregate, clear, service_key, set_pending};
pub use timeout::{run_timeout_sweeper, sweep_statuses};
pub use watcher::run_resize_watcher;
