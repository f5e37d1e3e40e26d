use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Transport protocol of a discovered port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    /// Parse the protocol attribute nmap emits (`tcp`/`udp`).
    pub fn from_nmap(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(Transport::Tcp),
            "udp" => Some(Transport::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

/// Port state as classified by the scan engine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unfiltered,
    OpenFiltered,
    ClosedFiltered,
    Unknown,
}

impl PortState {
    pub fn from_nmap(s: &str) -> Self {
        match s {
            "open" => PortState::Open,
            "closed" => PortState::Closed,
            "filtered" => PortState::Filtered,
            "unfiltered" => PortState::Unfiltered,
            "open|filtered" => PortState::OpenFiltered,
            "closed|filtered" => PortState::ClosedFiltered,
            _ => PortState::Unknown,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PortState::Open)
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
            PortState::Unfiltered => "unfiltered",
            PortState::OpenFiltered => "open|filtered",
            PortState::ClosedFiltered => "closed|filtered",
            PortState::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// The single target of one recon run. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    host: String,
    port_range: Option<String>,
}

impl ScanTarget {
    /// Validate and wrap a target host (IP or domain) with an optional
    /// port-range restriction for the discovery stage.
    pub fn new(host: &str, port_range: Option<String>) -> anyhow::Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            anyhow::bail!("target host is empty");
        }
        if host
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ';' | '|' | '&' | '$' | '`' | '\'' | '"'))
        {
            anyhow::bail!("target host contains invalid characters: {host}");
        }
        Ok(Self {
            host: host.to_string(),
            port_range,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port_range(&self) -> Option<&str> {
        self.port_range.as_deref()
    }

    /// True when the host is a name rather than a literal IP address.
    /// Domain-only probes (subdomain enumeration, zone transfers) key off this.
    pub fn is_domain(&self) -> bool {
        IpAddr::from_str(&self.host).is_err()
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)
    }
}

/// Verbatim output of one nmap script, attached to its port by the deep scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub id: String,
    pub output: String,
}

/// One discovered port. `(port, transport)` is unique within a scan and the
/// aggregated list is always sorted ascending by port number.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortRecord {
    pub port: u16,
    pub transport: Transport,
    pub state: PortState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<ScriptOutput>,
}

/// Protocol family a probe speaks. One family per recognized port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    Web,
    Ftp,
    Ssh,
    Smb,
    Dns,
    Database,
}

impl ProtocolFamily {
    pub fn tag(&self) -> &'static str {
        match self {
            ProtocolFamily::Web => "web",
            ProtocolFamily::Ftp => "ftp",
            ProtocolFamily::Ssh => "ssh",
            ProtocolFamily::Smb => "smb",
            ProtocolFamily::Dns => "dns",
            ProtocolFamily::Database => "database",
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// How a probe failed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    /// Connection refused or reset before any data was exchanged.
    Connect,
    /// A blocking step exceeded its bound.
    Timeout,
    /// The peer spoke, but not in a shape we could parse.
    Protocol,
    /// An optional external tool is not installed.
    ToolUnavailable,
    Other,
}

/// A recorded probe failure. Never escalated past the owning `ProbeResult`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProbeFailure {
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Connect, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Timeout, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Protocol, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Other, message)
    }
}

/// Outcome of an authentication check. Three-valued so "we could not check"
/// is distinguishable from "checked, open" and "checked, locked down".
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthCheck {
    Required,
    NotRequired,
    NotChecked,
}

/// Uniform output of any protocol probe against one target:port.
///
/// A non-null `error` never discards partial data: whatever fields were
/// collected before the failure point stay populated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub port: u16,
    pub family: ProtocolFamily,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeFailure>,
}

impl ProbeResult {
    pub fn new(port: u16, family: ProtocolFamily) -> Self {
        Self {
            port,
            family,
            fields: BTreeMap::new(),
            notes: Vec::new(),
            error: None,
        }
    }

    /// Record a collected field.
    pub fn set(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Attach a non-fatal note (e.g. a missing optional tool).
    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }

    /// Mark the probe failed, keeping everything collected so far.
    pub fn fail(mut self, failure: ProbeFailure) -> Self {
        self.error = Some(failure);
        self
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// The final per-target record handed to report assembly. Probe results are
/// keyed by port so iteration order is ascending-by-port regardless of
/// probe completion order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AggregateReport {
    pub target: String,
    pub started_at: String,
    pub total_ports: usize,
    pub open_count: usize,
    pub ports: Vec<PortRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub probes: BTreeMap<u16, ProbeResult>,
}
