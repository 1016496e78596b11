//! Canonical status derivation and the transition guard that decides whether a newly
//! derived status should overwrite a branch's persisted one.
//!
//! Grounded in `derive_branch_status_from_services`/`_should_update_branch_status`/
//! `_adjust_derived_status_for_stuck_creation` (original_source/src/api/organization/
//! project/branch/status.py), generalized from that module's per-request session shape
//! to a pure function pair the monitor loop calls against values it has already fetched.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::models::{BranchResizeStatus, BranchStatus, ResizeStatusEntry};

use super::probe::ProbeResult;

const TRANSITIONAL: [BranchStatus; 9] = [
    BranchStatus::Creating,
    BranchStatus::Starting,
    BranchStatus::Stopping,
    BranchStatus::Restarting,
    BranchStatus::Pausing,
    BranchStatus::Resuming,
    BranchStatus::Updating,
    BranchStatus::Deleting,
    BranchStatus::Resizing,
];

fn is_transitional(status: BranchStatus) -> bool {
    TRANSITIONAL.contains(&status)
}

/// Fold per-service probe results into one of the five top-level outcomes.
pub fn derive_status(probes: &[ProbeResult]) -> BranchStatus {
    if probes.iter().all(|p| *p == ProbeResult::Healthy) {
        BranchStatus::ActiveHealthy
    } else if probes.iter().any(|p| *p == ProbeResult::Error) {
        BranchStatus::Error
    } else if probes.iter().all(|p| *p == ProbeResult::Stopped) {
        BranchStatus::Stopped
    } else if probes.iter().any(|p| *p == ProbeResult::Unknown) {
        BranchStatus::Unknown
    } else {
        BranchStatus::ActiveUnhealthy
    }
}

/// Whether a resize row is still in flight for the "keep RESIZING" guard rule.
pub fn has_active_resize(statuses: &std::collections::HashMap<String, ResizeStatusEntry>) -> bool {
    statuses.values().any(|entry| {
        matches!(
            entry.status,
            BranchResizeStatus::Pending | BranchResizeStatus::Resizing | BranchResizeStatus::FilesystemResizePending
        )
    })
}

/// Inputs the transition guard needs beyond `current`/`derived` themselves.
pub struct TransitionContext {
    pub has_active_resize: bool,
    /// When the branch entered its current status — used for the CREATING/STARTING
    /// stuck-in-STOPPED grace window.
    pub status_since: DateTime<Utc>,
    pub grace_period: Duration,
}

/// Apply the stuck-creation/starting promotion (rule 6) before the main guard: a
/// CREATING or STARTING branch that has seen STOPPED services past the grace window is
/// promoted to ERROR instead of being silently absorbed.
fn adjust_for_stuck_creation(current: BranchStatus, derived: BranchStatus, ctx: &TransitionContext, now: DateTime<Utc>) -> BranchStatus {
    if derived != BranchStatus::Stopped {
        return derived;
    }
    let elapsed = now.signed_duration_since(ctx.status_since);
    let grace = chrono::Duration::from_std(ctx.grace_period).unwrap_or(chrono::Duration::zero());
    if matches!(current, BranchStatus::Creating | BranchStatus::Starting) && elapsed >= grace {
        return BranchStatus::Error;
    }
    derived
}

/// Decide the status a branch should be written with, given its current persisted
/// status and the status just derived from probes. Returns `current` when no write is
/// warranted (no-op is distinguished from "write current back" only by the caller
/// choosing to skip the write when the return value equals `current`).
pub fn apply_transition(current: BranchStatus, derived: BranchStatus, ctx: &TransitionContext, now: DateTime<Utc>) -> BranchStatus {
    let derived = adjust_for_stuck_creation(current, derived, ctx, now);

    if current == derived {
        return current;
    }

    // Rule 2: sticky RESIZING while a resize row is still active, unless ERROR.
    if current == BranchStatus::Resizing && ctx.has_active_resize {
        return if derived == BranchStatus::Error { derived } else { current };
    }

    // Rule 3: ignore the spurious STARTING -> STOPPED early flap.
    if current == BranchStatus::Starting && derived == BranchStatus::Stopped {
        return current;
    }

    // Rule 4: PAUSED is sticky except to ACTIVE_HEALTHY or ERROR.
    if current == BranchStatus::Paused
        && !matches!(derived, BranchStatus::ActiveHealthy | BranchStatus::Error)
    {
        return current;
    }

    // Rule 5: transitional states absorb a STOPPED derivation unless explicitly STOPPING.
    if derived == BranchStatus::Stopped && is_transitional(current) && current != BranchStatus::Stopping {
        return current;
    }

    // Rule 6: UNKNOWN never overwrites a transitional or PAUSED current status — a
    // transient probe failure shouldn't flip an in-flight branch out of its state.
    if derived == BranchStatus::Unknown && (is_transitional(current) || current == BranchStatus::Paused) {
        return current;
    }

    // Rule 7: terminal sinks, and everything else not caught above, accept the derived
    // status.
    derived
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(grace_secs: u64, since: DateTime<Utc>) -> TransitionContext {
        TransitionContext { has_active_resize: false, status_since: since, grace_period: Duration::from_secs(grace_secs) }
    }

    #[test]
    fn all_healthy_probes_derive_active_healthy() {
        let probes = [ProbeResult::Healthy, ProbeResult::Healthy, ProbeResult::Healthy];
        assert_eq!(derive_status(&probes), BranchStatus::ActiveHealthy);
    }

    #[test]
    fn any_error_probe_derives_error() {
        let probes = [ProbeResult::Healthy, ProbeResult::Error, ProbeResult::Stopped];
        assert_eq!(derive_status(&probes), BranchStatus::Error);
    }

    #[test]
    fn all_stopped_probes_derive_stopped() {
        let probes = [ProbeResult::Stopped, ProbeResult::Stopped];
        assert_eq!(derive_status(&probes), BranchStatus::Stopped);
    }

    #[test]
    fn unknown_probe_without_error_derives_unknown() {
        let probes = [ProbeResult::Healthy, ProbeResult::Unknown, ProbeResult::Stopped];
        assert_eq!(derive_status(&probes), BranchStatus::Unknown);
    }

    #[test]
    fn mixed_healthy_and_stopped_derives_active_unhealthy() {
        let probes = [ProbeResult::Healthy, ProbeResult::Stopped];
        assert_eq!(derive_status(&probes), BranchStatus::ActiveUnhealthy);
    }

    #[test]
    fn equal_current_and_derived_is_a_no_op() {
        let now = Utc::now();
        let result = apply_transition(BranchStatus::ActiveHealthy, BranchStatus::ActiveHealthy, &ctx(300, now), now);
        assert_eq!(result, BranchStatus::ActiveHealthy);
    }

    #[test]
    fn resizing_with_active_resize_row_stays_resizing_unless_error() {
        let now = Utc::now();
        let mut c = ctx(300, now);
        c.has_active_resize = true;
        assert_eq!(apply_transition(BranchStatus::Resizing, BranchStatus::ActiveUnhealthy, &c, now), BranchStatus::Resizing);
        assert_eq!(apply_transition(BranchStatus::Resizing, BranchStatus::Error, &c, now), BranchStatus::Error);
    }

    #[test]
    fn starting_to_stopped_flap_is_ignored() {
        let now = Utc::now();
        let result = apply_transition(BranchStatus::Starting, BranchStatus::Stopped, &ctx(300, now), now);
        assert_eq!(result, BranchStatus::Starting);
    }

    #[test]
    fn paused_is_sticky_except_to_healthy_or_error() {
        let now = Utc::now();
        assert_eq!(apply_transition(BranchStatus::Paused, BranchStatus::ActiveUnhealthy, &ctx(300, now), now), BranchStatus::Paused);
        assert_eq!(apply_transition(BranchStatus::Paused, BranchStatus::ActiveHealthy, &ctx(300, now), now), BranchStatus::ActiveHealthy);
        assert_eq!(apply_transition(BranchStatus::Paused, BranchStatus::Error, &ctx(300, now), now), BranchStatus::Error);
    }

    #[test]
    fn transitional_state_absorbs_stopped_unless_stopping() {
        let now = Utc::now();
        assert_eq!(apply_transition(BranchStatus::Updating, BranchStatus::Stopped, &ctx(300, now), now), BranchStatus::Updating);
        assert_eq!(apply_transition(BranchStatus::Stopping, BranchStatus::Stopped, &ctx(300, now), now), BranchStatus::Stopped);
    }

    #[test]
    fn creating_stuck_in_stopped_past_grace_promotes_to_error() {
        let since = Utc::now() - chrono::Duration::minutes(10);
        let now = Utc::now();
        let result = apply_transition(BranchStatus::Creating, BranchStatus::Stopped, &ctx(300, since), now);
        assert_eq!(result, BranchStatus::Error);
    }

    #[test]
    fn creating_within_grace_window_absorbs_stopped() {
        let since = Utc::now() - chrono::Duration::seconds(10);
        let now = Utc::now();
        let result = apply_transition(BranchStatus::Creating, BranchStatus::Stopped, &ctx(300, since), now);
        assert_eq!(result, BranchStatus::Creating);
    }

    #[test]
    fn unknown_does_not_overwrite_transitional_or_paused_state() {
        let now = Utc::now();
        assert_eq!(apply_transition(BranchStatus::Creating, BranchStatus::Unknown, &ctx(300, now), now), BranchStatus::Creating);
        assert_eq!(apply_transition(BranchStatus::Starting, BranchStatus::Unknown, &ctx(300, now), now), BranchStatus::Starting);
        assert_eq!(apply_transition(BranchStatus::Paused, BranchStatus::Unknown, &ctx(300, now), now), BranchStatus::Paused);
    }

    #[test]
    fn terminal_sinks_always_accept_derived() {
        let now = Utc::now();
        assert_eq!(apply_transition(BranchStatus::ActiveHealthy, BranchStatus::ActiveUnhealthy, &ctx(300, now), now), BranchStatus::ActiveUnhealthy);
        assert_eq!(apply_transition(BranchStatus::Error, BranchStatus::ActiveHealthy, &ctx(300, now), now), BranchStatus::ActiveHealthy);
    }
}
