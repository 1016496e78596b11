//! C1: Snapshot/Clone Engine.
//!
//! Captures point-in-time CSI snapshots of branch database volumes and uses them to
//! clone a branch into a new namespace or restore an existing branch in place.

mod clone;
mod k8s;
mod naming;
mod wait;

pub use clone::{capture_snapshot, clone_volume, restore_volume, CapturedSnapshot, CloneTimeouts};
pub use k8s::{delete_snapshot, SnapshotMaterial};
