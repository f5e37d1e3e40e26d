use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use recon_rs::config::RunConfig;
use recon_rs::dispatch::aggregate_with;
use recon_rs::probes::{Probe, ProbeRegistry};
use recon_rs::types::{
    PortRecord, PortState, ProbeErrorKind, ProbeFailure, ProbeResult, ProtocolFamily, ScanTarget,
    Transport,
};

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Succeed,
    FailProbe,
    Panic,
    Hang,
}

struct StaticProbe {
    family: ProtocolFamily,
    behavior: Behavior,
}

#[async_trait]
impl Probe for StaticProbe {
    fn family(&self) -> ProtocolFamily {
        self.family
    }

    async fn run(&self, _target: &ScanTarget, port: u16, _cfg: &RunConfig) -> ProbeResult {
        match self.behavior {
            Behavior::Succeed => {
                let mut result = ProbeResult::new(port, self.family);
                result.set("ok", true);
                result
            }
            Behavior::FailProbe => ProbeResult::new(port, self.family)
                .fail(ProbeFailure::connect("connection refused")),
            Behavior::Panic => panic!("probe blew up"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ProbeResult::new(port, self.family)
            }
        }
    }
}

/// Registry whose probes misbehave on demand, per family.
struct StubRegistry {
    fail: Option<ProtocolFamily>,
    panic: Option<ProtocolFamily>,
    hang: Option<ProtocolFamily>,
}

impl StubRegistry {
    fn well_behaved() -> Self {
        Self {
            fail: None,
            panic: None,
            hang: None,
        }
    }
}

impl ProbeRegistry for StubRegistry {
    fn probe_for(&self, family: ProtocolFamily) -> Box<dyn Probe> {
        let behavior = if self.fail == Some(family) {
            Behavior::FailProbe
        } else if self.panic == Some(family) {
            Behavior::Panic
        } else if self.hang == Some(family) {
            Behavior::Hang
        } else {
            Behavior::Succeed
        };
        Box::new(StaticProbe { family, behavior })
    }
}

fn record(port: u16, state: PortState, service: &str) -> PortRecord {
    PortRecord {
        port,
        transport: Transport::Tcp,
        state,
        service: service.into(),
        version: String::new(),
        scripts: Vec::new(),
    }
}

fn target() -> ScanTarget {
    ScanTarget::new("10.0.0.5", None).unwrap()
}

#[tokio::test]
async fn closed_ports_receive_no_probe() {
    // the canonical scenario: 22 open ssh, 80 open http, 3306 closed
    let records = vec![
        record(80, PortState::Open, "http"),
        record(22, PortState::Open, "ssh"),
        record(3306, PortState::Closed, ""),
    ];
    let report = aggregate_with(
        &StubRegistry::well_behaved(),
        &target(),
        records,
        &RunConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    let ports: Vec<u16> = report.ports.iter().map(|r| r.port).collect();
    assert_eq!(ports, vec![22, 80, 3306]);
    assert_eq!(report.ports[2].state, PortState::Closed);

    let probed: Vec<u16> = report.probes.keys().copied().collect();
    assert_eq!(probed, vec![22, 80]);
    assert_eq!(report.open_count, 2);
}

#[tokio::test]
async fn one_failing_probe_never_aborts_the_rest() {
    let records = vec![
        record(21, PortState::Open, "ftp"),
        record(22, PortState::Open, "ssh"),
        record(80, PortState::Open, "http"),
    ];
    let registry = StubRegistry {
        fail: Some(ProtocolFamily::Ftp),
        panic: None,
        hang: None,
    };
    let report = aggregate_with(
        &registry,
        &target(),
        records,
        &RunConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(report.probes.len(), 3);
    assert!(report.probes[&21].is_err());
    assert_eq!(
        report.probes[&21].error.as_ref().unwrap().kind,
        ProbeErrorKind::Connect
    );
    assert!(!report.probes[&22].is_err());
    assert!(!report.probes[&80].is_err());
}

#[tokio::test]
async fn panicking_probe_is_contained_and_attributed() {
    let records = vec![
        record(22, PortState::Open, "ssh"),
        record(80, PortState::Open, "http"),
    ];
    let registry = StubRegistry {
        fail: None,
        panic: Some(ProtocolFamily::Ssh),
        hang: None,
    };
    let report = aggregate_with(
        &registry,
        &target(),
        records,
        &RunConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    let crashed = &report.probes[&22];
    assert!(crashed.is_err());
    assert_eq!(crashed.family, ProtocolFamily::Ssh);
    assert!(crashed.error.as_ref().unwrap().message.contains("port 22"));
    assert!(!report.probes[&80].is_err());
}

#[tokio::test(start_paused = true)]
async fn hanging_probe_converts_to_timeout() {
    let records = vec![
        record(22, PortState::Open, "ssh"),
        record(80, PortState::Open, "http"),
    ];
    let registry = StubRegistry {
        fail: None,
        panic: None,
        hang: Some(ProtocolFamily::Ssh),
    };
    let report = aggregate_with(
        &registry,
        &target(),
        records,
        &RunConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(
        report.probes[&22].error.as_ref().unwrap().kind,
        ProbeErrorKind::Timeout
    );
    assert!(!report.probes[&80].is_err());
}

#[tokio::test]
async fn unrecognized_ports_get_no_probe_entry() {
    let records = vec![
        record(6000, PortState::Open, ""),
        record(22, PortState::Open, "ssh"),
    ];
    let report = aggregate_with(
        &StubRegistry::well_behaved(),
        &target(),
        records,
        &RunConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert!(report.probes.contains_key(&22));
    assert!(!report.probes.contains_key(&6000));
    // the port itself still appears in the record list
    assert!(report.ports.iter().any(|r| r.port == 6000));
}

#[tokio::test]
async fn identical_inputs_yield_identical_reports_except_timestamp() {
    let records = vec![
        record(21, PortState::Open, "ftp"),
        record(22, PortState::Open, "ssh"),
        record(443, PortState::Open, "https"),
    ];
    let registry = StubRegistry {
        fail: Some(ProtocolFamily::Ftp),
        panic: None,
        hang: None,
    };
    let cfg = RunConfig::default();
    let cancel = CancellationToken::new();

    let first = aggregate_with(&registry, &target(), records.clone(), &cfg, &cancel).await;
    let mut second = aggregate_with(&registry, &target(), records, &cfg, &cancel).await;
    second.started_at = first.started_at.clone();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[tokio::test]
async fn cancelled_run_still_returns_a_report() {
    let records = vec![
        record(22, PortState::Open, "ssh"),
        record(80, PortState::Open, "http"),
    ];
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = aggregate_with(
        &StubRegistry::well_behaved(),
        &target(),
        records,
        &RunConfig::default(),
        &cancel,
    )
    .await;

    // every entry is present and explicitly marked, nothing is lost silently
    assert_eq!(report.ports.len(), 2);
    for probe in report.probes.values() {
        assert!(probe.is_err());
    }
}
