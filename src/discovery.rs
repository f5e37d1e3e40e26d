//! Two-phase port discovery: a fast broad scan to find open ports, then a
//! version/script scan restricted to exactly that open set.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::nmap::DiscoveryError;
use crate::types::{PortRecord, ScanTarget, Transport};

/// Narrow seam over the external scan engine. The orchestration below only
/// ever sees structured records, never engine output.
#[async_trait]
pub trait ScanEngine {
    async fn quick_scan(
        &self,
        target: &ScanTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<PortRecord>, DiscoveryError>;

    async fn version_scan(
        &self,
        target: &ScanTarget,
        open_ports: &[u16],
        cancel: &CancellationToken,
    ) -> Result<Vec<PortRecord>, DiscoveryError>;
}

/// Run both discovery phases against `target`.
///
/// Phase 2 only runs when phase 1 found at least one open port; zero open
/// ports is a normal outcome, not an error. A phase-2 failure degrades to
/// the phase-1 data instead of discarding it.
pub async fn discover<E>(
    engine: &E,
    target: &ScanTarget,
    cancel: &CancellationToken,
) -> Result<Vec<PortRecord>, DiscoveryError>
where
    E: ScanEngine + Sync + ?Sized,
{
    info!(host = %target, "phase 1: quick port scan");
    let quick = engine.quick_scan(target, cancel).await?;

    let open_ports: Vec<u16> = quick
        .iter()
        .filter(|r| r.state.is_open())
        .map(|r| r.port)
        .collect();

    if open_ports.is_empty() {
        info!(host = %target, "no open ports found, skipping version scan");
        return Ok(quick);
    }

    info!(
        host = %target,
        count = open_ports.len(),
        "phase 2: version scan on open ports"
    );
    match engine.version_scan(target, &open_ports, cancel).await {
        Ok(deep) => Ok(merge_phases(quick, deep)),
        Err(e) => {
            warn!(host = %target, error = %e, "version scan failed, keeping quick-scan data");
            Ok(quick)
        }
    }
}

/// Overlay phase-2 records onto phase-1 records per `(port, transport)`.
/// Phase-1-only records survive; the result is sorted ascending by port.
fn merge_phases(quick: Vec<PortRecord>, deep: Vec<PortRecord>) -> Vec<PortRecord> {
    let mut merged: BTreeMap<(u16, Transport), PortRecord> = quick
        .into_iter()
        .map(|r| ((r.port, r.transport), r))
        .collect();
    for record in deep {
        merged.insert((record.port, record.transport), record);
    }
    merged.into_values().collect()
}
