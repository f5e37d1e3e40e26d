//! Dispatch & aggregation: map each open port to its probe, fan the probes
//! out with bounded concurrency, and merge the results into one
//! deterministic, port-ordered report. One probe's failure (error, timeout,
//! even a panic) never aborts the run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::probes::{self, DefaultRegistry, ProbeRegistry};
use crate::report::now_rfc3339;
use crate::types::{
    AggregateReport, PortRecord, ProbeFailure, ProbeResult, ProtocolFamily, ScanTarget,
};

/// Probe every recognized open port and assemble the aggregate report.
pub async fn aggregate(
    target: &ScanTarget,
    records: Vec<PortRecord>,
    cfg: &RunConfig,
    cancel: &CancellationToken,
) -> AggregateReport {
    aggregate_with(&DefaultRegistry, target, records, cfg, cancel).await
}

/// Same, with an injected probe registry so dispatch behavior is testable
/// without a network.
pub async fn aggregate_with<R: ProbeRegistry>(
    registry: &R,
    target: &ScanTarget,
    mut records: Vec<PortRecord>,
    cfg: &RunConfig,
    cancel: &CancellationToken,
) -> AggregateReport {
    let started_at = now_rfc3339();
    records.sort_by_key(|r| (r.port, r.transport));
    let open_count = records.iter().filter(|r| r.state.is_open()).count();

    let semaphore = Arc::new(Semaphore::new(cfg.probe_concurrency.clamp(1, 64)));
    let mut set: JoinSet<(u16, ProtocolFamily, ProbeResult)> = JoinSet::new();
    // task id -> (port, family), so a panicked task can still be attributed
    let mut spawned: HashMap<tokio::task::Id, (u16, ProtocolFamily)> = HashMap::new();

    for record in records.iter().filter(|r| r.state.is_open()) {
        let Some(family) = probes::select_family(record) else {
            debug!(port = record.port, "no probe convention for port");
            continue;
        };
        let probe = registry.probe_for(family);
        let port = record.port;
        let budget = cfg.probe_budget(family);
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let target = target.clone();
        let cfg = cfg.clone();

        let handle = set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore open");
            if cancel.is_cancelled() {
                let result = ProbeResult::new(port, family)
                    .fail(ProbeFailure::other("cancelled before probe started"));
                return (port, family, result);
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => ProbeResult::new(port, family)
                    .fail(ProbeFailure::other("cancelled mid-probe")),
                res = timeout(budget, probe.run(&target, port, &cfg)) => match res {
                    Ok(result) => result,
                    Err(_) => ProbeResult::new(port, family).fail(ProbeFailure::timeout(
                        format!("{family} probe exceeded its {budget:?} budget"),
                    )),
                },
            };
            (port, family, result)
        });
        spawned.insert(handle.id(), (port, family));
    }

    let mut probe_map: BTreeMap<u16, ProbeResult> = BTreeMap::new();
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((_id, (port, family, result))) => {
                if result.is_err() {
                    debug!(port, %family, error = ?result.error, "probe finished with error");
                }
                probe_map.insert(port, result);
            }
            Err(join_err) => {
                // a probe body broke its own contract; contain it
                let Some(&(port, family)) = spawned.get(&join_err.id()) else {
                    warn!(error = %join_err, "lost track of a crashed probe task");
                    continue;
                };
                warn!(port, %family, error = %join_err, "probe crashed, recording failure");
                probe_map.insert(
                    port,
                    ProbeResult::new(port, family).fail(ProbeFailure::other(format!(
                        "{family} probe on port {port} crashed: {join_err}"
                    ))),
                );
            }
        }
    }

    AggregateReport {
        target: target.host().to_string(),
        started_at,
        total_ports: records.len(),
        open_count,
        ports: records,
        probes: probe_map,
    }
}
