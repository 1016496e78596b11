//! TCP reachability probing for branch services.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Per-service reachability, folded into a branch-wide status by [`super::status::derive_status`].
///
/// A refused connection means the service's port isn't listening — the expected shape
/// of a deliberately stopped branch, not a fault. A timeout means the probe couldn't
/// reach a verdict either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Healthy,
    Stopped,
    Error,
    Unknown,
}

pub async fn probe_tcp(addr: &str, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => ProbeResult::Healthy,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "probe connection refused or failed");
            ProbeResult::Stopped
        }
        Err(_) => {
            debug!(%addr, "probe timed out");
            ProbeResult::Unknown
        }
    }
}

/// DNS-resolvable service endpoints for one branch, derived from the branch's namespace.
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub database: String,
    pub meta: String,
    pub rest: String,
    pub storage: Option<String>,
}

impl ServiceEndpoints {
    pub fn for_namespace(namespace: &str, storage_enabled: bool) -> Self {
        let host = |svc: &str| format!("{svc}.{namespace}.svc.cluster.local:{}", port_for(svc));
        Self {
            database: host("db"),
            meta: host("meta"),
            rest: host("rest"),
            storage: storage_enabled.then(|| host("storage")),
        }
    }
}

fn port_for(service: &str) -> u16 {
    match service {
        "db" => 5432,
        "meta" => 8080,
        "rest" => 3000,
        "storage" => 5000,
        _ => 80,
    }
}

/// Probe every configured service endpoint, short-circuiting to an all-[`ProbeResult::Error`]
/// reading when the caller already knows the VM itself is in an error phase.
pub async fn probe_all(endpoints: &ServiceEndpoints, timeout: Duration, vm_errored: bool) -> Vec<ProbeResult> {
    if vm_errored {
        let count = if endpoints.storage.is_some() { 4 } else { 3 };
        return vec![ProbeResult::Error; count];
    }

    let mut results = vec![
        probe_tcp(&endpoints.database, timeout).await,
        probe_tcp(&endpoints.meta, timeout).await,
        probe_tcp(&endpoints.rest, timeout).await,
    ];
    if let Some(storage) = &endpoints.storage {
        results.push(probe_tcp(storage, timeout).await);
    }
    results
}
