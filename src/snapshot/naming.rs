//! Deterministic, Kubernetes-safe naming for snapshot artifacts.

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

use crate::ids::BranchId;

const MAX_NAME_LEN: usize = 63;

fn sanitize_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9-]+").unwrap())
}

fn collapse_dashes_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-{2,}").unwrap())
}

/// Lowercase, strip anything outside `[a-z0-9-]`, collapse runs of `-`, trim the ends.
pub fn sanitize_label(label: &str) -> String {
    let lowered = label.to_lowercase();
    let replaced = sanitize_regex().replace_all(&lowered, "-");
    let collapsed = collapse_dashes_regex().replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}

fn truncate_63(name: &str) -> String {
    let truncated = if name.len() > MAX_NAME_LEN { &name[..MAX_NAME_LEN] } else { name };
    truncated.trim_end_matches('-').to_string()
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// `ulid`'s `Display` renders uppercase Crockford base32; Kubernetes resource names
/// are restricted to `[a-z0-9-]`, so every embedded branch ID must be lowercased.
fn lower_branch(branch: BranchId) -> String {
    branch.to_string().to_lowercase()
}

pub fn snapshot_name(branch: BranchId, label: &str) -> String {
    let sanitized = sanitize_label(label);
    let branch = lower_branch(branch);
    truncate_63(&format!("{branch}-{sanitized}-{}", timestamp()))
}

pub fn crossns_content_name(target_branch: BranchId) -> String {
    let target_branch = lower_branch(target_branch);
    truncate_63(&format!("snapcontent-crossns-{target_branch}-{}", timestamp()))
}

pub fn restore_content_name(target_branch: BranchId) -> String {
    let target_branch = lower_branch(target_branch);
    truncate_63(&format!("snapcontent-restore-{target_branch}-{}", timestamp()))
}

pub fn clone_snapshot_names(source: BranchId, target: BranchId) -> (String, String) {
    let ts = timestamp();
    let source = lower_branch(source);
    let target = lower_branch(target);
    (
        truncate_63(&format!("{source}-snapshot-{ts}")),
        truncate_63(&format!("{target}-snapshot-{ts}")),
    )
}

pub fn restore_snapshot_name(target: BranchId) -> String {
    let target = lower_branch(target);
    truncate_63(&format!("{target}-restore-{}", timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_and_collapses() {
        assert_eq!(sanitize_label("Nightly Backup!!"), "nightly-backup");
        assert_eq!(sanitize_label("--leading and trailing--"), "leading-and-trailing");
    }

    #[test]
    fn snapshot_name_is_within_k8s_length_limit() {
        let branch = BranchId::new();
        let name = snapshot_name(branch, "a very long label that keeps going and going and going");
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(!name.ends_with('-'));
    }

    #[test]
    fn generated_names_are_lowercase_rfc1123() {
        let branch = BranchId::new();
        let target = BranchId::new();
        let charset_ok = |s: &str| s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

        assert!(charset_ok(&snapshot_name(branch, "Nightly Backup")));
        assert!(charset_ok(&crossns_content_name(target)));
        assert!(charset_ok(&restore_content_name(target)));
        let (source_name, target_name) = clone_snapshot_names(branch, target);
        assert!(charset_ok(&source_name));
        assert!(charset_ok(&target_name));
        assert!(charset_ok(&restore_snapshot_name(target)));
    }
}
