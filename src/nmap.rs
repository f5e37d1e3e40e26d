//! Adapter around the external nmap engine: builds the two scan profiles,
//! runs the binary with a wall-clock bound, and lifts its XML output into
//! `PortRecord`s. Nothing outside this module reads nmap output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::discovery::ScanEngine;
use crate::ports::to_engine_spec;
use crate::types::{PortRecord, PortState, ScanTarget, ScriptOutput, Transport};

/// Failures of the discovery stage. Only phase-1 instances abort a run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("scan engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("scan engine failed: {0}")]
    Engine(String),
    #[error("scan engine timed out after {0:?}")]
    Timeout(Duration),
    #[error("unusable scan output: {0}")]
    Parse(String),
    #[error("scan cancelled")]
    Cancelled,
}

/// The nmap scan engine.
pub struct Nmap {
    binary: String,
    quick_timeout: Duration,
    version_timeout: Duration,
}

impl Nmap {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            binary: cfg.nmap_binary.clone(),
            quick_timeout: cfg.quick_scan_timeout,
            version_timeout: cfg.version_scan_timeout,
        }
    }

    async fn run(
        &self,
        target: &ScanTarget,
        args: &[String],
        bound: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<PortRecord>, DiscoveryError> {
        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }
        debug!(host = %target, ?args, "invoking scan engine");

        let child = Command::new(&self.binary)
            .args(args)
            .arg(target.host())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DiscoveryError::EngineUnavailable(self.binary.clone())
                } else {
                    DiscoveryError::Engine(e.to_string())
                }
            })?;

        // Dropping the in-flight future on either branch kills the child.
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
            res = timeout(bound, child.wait_with_output()) => match res {
                Err(_) => return Err(DiscoveryError::Timeout(bound)),
                Ok(Err(e)) => return Err(DiscoveryError::Engine(e.to_string())),
                Ok(Ok(output)) => output,
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiscoveryError::Engine(format!(
                "exit {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let xml = String::from_utf8_lossy(&output.stdout);
        parse_scan_xml(&xml)
    }
}

#[async_trait]
impl ScanEngine for Nmap {
    /// Phase 1: broad and fast, no version probing. Caller-supplied range
    /// when present, otherwise the well-known top-1000 set.
    async fn quick_scan(
        &self,
        target: &ScanTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<PortRecord>, DiscoveryError> {
        let mut args: Vec<String> = vec!["-T4".into()];
        match target.port_range() {
            Some(range) => {
                args.push("-p".into());
                args.push(range.to_string());
            }
            None => {
                args.push("--top-ports".into());
                args.push("1000".into());
            }
        }
        args.push("-oX".into());
        args.push("-".into());
        self.run(target, &args, self.quick_timeout, cancel).await
    }

    /// Phase 2: service/version/script detection, restricted to exactly the
    /// open set phase 1 produced.
    async fn version_scan(
        &self,
        target: &ScanTarget,
        open_ports: &[u16],
        cancel: &CancellationToken,
    ) -> Result<Vec<PortRecord>, DiscoveryError> {
        let args: Vec<String> = vec![
            "-sV".into(),
            "-sC".into(),
            "-T4".into(),
            "-p".into(),
            to_engine_spec(open_ports),
            "-oX".into(),
            "-".into(),
        ];
        self.run(target, &args, self.version_timeout, cancel).await
    }
}

// Minimal model of nmap's XML output, intentionally partial: only the
// host/port/state/service/script slice this crate consumes.

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<XmlHost>,
}

#[derive(Debug, Deserialize)]
struct XmlHost {
    ports: Option<XmlPorts>,
}

#[derive(Debug, Deserialize)]
struct XmlPorts {
    #[serde(rename = "port", default)]
    ports: Vec<XmlPort>,
}

#[derive(Debug, Deserialize)]
struct XmlPort {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    portid: u16,
    state: XmlState,
    service: Option<XmlService>,
    #[serde(rename = "script", default)]
    scripts: Vec<XmlScript>,
}

#[derive(Debug, Deserialize)]
struct XmlState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize, Default)]
struct XmlService {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@product", default)]
    product: String,
    #[serde(rename = "@version", default)]
    version: String,
    #[serde(rename = "@extrainfo", default)]
    extrainfo: String,
}

#[derive(Debug, Deserialize)]
struct XmlScript {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@output", default)]
    output: String,
}

/// Parse one engine run into records, sorted ascending by port and
/// deduplicated on `(port, transport)`.
pub(crate) fn parse_scan_xml(xml: &str) -> Result<Vec<PortRecord>, DiscoveryError> {
    let run: NmapRun =
        quick_xml::de::from_str(xml).map_err(|e| DiscoveryError::Parse(e.to_string()))?;

    let mut records: Vec<PortRecord> = Vec::new();
    for host in run.hosts {
        let Some(ports) = host.ports else { continue };
        for p in ports.ports {
            let Some(transport) = Transport::from_nmap(&p.protocol) else {
                warn!(protocol = %p.protocol, port = p.portid, "unrecognized transport, skipping");
                continue;
            };
            let service = p.service.unwrap_or_default();
            records.push(PortRecord {
                port: p.portid,
                transport,
                state: PortState::from_nmap(&p.state.state),
                version: assemble_version(&service),
                service: service.name,
                scripts: p
                    .scripts
                    .into_iter()
                    .map(|s| ScriptOutput {
                        id: s.id,
                        output: s.output,
                    })
                    .collect(),
            });
        }
    }

    records.sort_by_key(|r| (r.port, r.transport));
    records.dedup_by_key(|r| (r.port, r.transport));
    Ok(records)
}

/// `product version (extrainfo)`, skipping whichever pieces are empty.
fn assemble_version(service: &XmlService) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !service.product.is_empty() {
        parts.push(service.product.clone());
    }
    if !service.version.is_empty() {
        parts.push(service.version.clone());
    }
    if !service.extrainfo.is_empty() {
        parts.push(format!("({})", service.extrainfo));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" args="nmap -sV -oX - 10.0.0.5" start="1722470400" version="7.94">
<host starttime="1722470400" endtime="1722470455">
<status state="up" reason="syn-ack"/>
<address addr="10.0.0.5" addrtype="ipv4"/>
<ports>
<extraports state="closed" count="997"><extrareasons reason="conn-refused" count="997"/></extraports>
<port protocol="tcp" portid="80">
<state state="open" reason="syn-ack" reason_ttl="64"/>
<service name="http" product="Apache httpd" version="2.4.41" extrainfo="Ubuntu" method="probed" conf="10"/>
<script id="http-title" output="Welcome to nginx!"/>
</port>
<port protocol="tcp" portid="22">
<state state="open" reason="syn-ack" reason_ttl="64"/>
<service name="ssh" product="OpenSSH" version="8.2p1" extrainfo="Ubuntu Linux; protocol 2.0" method="probed" conf="10"/>
</port>
<port protocol="tcp" portid="3306">
<state state="closed" reason="conn-refused" reason_ttl="64"/>
<service name="mysql" method="table" conf="3"/>
</port>
</ports>
</host>
<runstats><finished time="1722470455" exit="success"/><hosts up="1" down="0" total="1"/></runstats>
</nmaprun>
"#;

    #[test]
    fn parses_sorted_records_with_versions() {
        let records = parse_scan_xml(FIXTURE).unwrap();
        let ports: Vec<u16> = records.iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![22, 80, 3306]);

        let ssh = &records[0];
        assert_eq!(ssh.service, "ssh");
        assert_eq!(ssh.version, "OpenSSH 8.2p1 (Ubuntu Linux; protocol 2.0)");
        assert!(ssh.state.is_open());

        let http = &records[1];
        assert_eq!(http.version, "Apache httpd 2.4.41 (Ubuntu)");
        assert_eq!(http.scripts.len(), 1);
        assert_eq!(http.scripts[0].id, "http-title");

        let mysql = &records[2];
        assert_eq!(mysql.state, PortState::Closed);
        assert_eq!(mysql.version, "");
    }

    #[test]
    fn host_without_ports_is_empty() {
        let xml = r#"<nmaprun><host><status state="down" reason="no-response"/></host></nmaprun>"#;
        assert!(parse_scan_xml(xml).unwrap().is_empty());
    }

    #[test]
    fn garbage_output_is_a_parse_error() {
        assert!(matches!(
            parse_scan_xml("Starting Nmap 7.94 ( https://nmap.org )"),
            Err(DiscoveryError::Parse(_))
        ));
    }

    #[test]
    fn duplicate_port_entries_are_deduplicated() {
        let xml = r#"<nmaprun><host><ports>
<port protocol="tcp" portid="22"><state state="open"/></port>
<port protocol="tcp" portid="22"><state state="open"/></port>
<port protocol="udp" portid="53"><state state="open|filtered"/></port>
</ports></host></nmaprun>"#;
        let records = parse_scan_xml(xml).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].port, 22);
        assert_eq!(records[1].transport, Transport::Udp);
        assert_eq!(records[1].state, PortState::OpenFiltered);
    }
}
