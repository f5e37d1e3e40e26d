//! The probe layer: one uniform capability per protocol family. Every probe
//! captures its own failures into the returned `ProbeResult`; nothing
//! escapes past `run`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::RunConfig;
use crate::types::{PortRecord, ProbeFailure, ProbeResult, ProtocolFamily, ScanTarget};

pub mod db;
pub mod dns;
pub mod ftp;
pub mod smb;
pub mod ssh;
pub mod web;

/// A single protocol-specific enumeration operation against one target:port.
#[async_trait]
pub trait Probe: Send + Sync {
    fn family(&self) -> ProtocolFamily;

    /// Best-effort collection; failures land in `ProbeResult::error`, and
    /// fields collected before a failure point are retained.
    async fn run(&self, target: &ScanTarget, port: u16, cfg: &RunConfig) -> ProbeResult;
}

/// Maps a family to its concrete probe. Swappable so dispatch can be tested
/// without touching the network.
pub trait ProbeRegistry: Send + Sync {
    fn probe_for(&self, family: ProtocolFamily) -> Box<dyn Probe>;
}

/// The real probes.
pub struct DefaultRegistry;

impl ProbeRegistry for DefaultRegistry {
    fn probe_for(&self, family: ProtocolFamily) -> Box<dyn Probe> {
        match family {
            ProtocolFamily::Web => Box::new(web::WebProbe),
            ProtocolFamily::Ftp => Box::new(ftp::FtpProbe),
            ProtocolFamily::Ssh => Box::new(ssh::SshProbe),
            ProtocolFamily::Smb => Box::new(smb::SmbProbe),
            ProtocolFamily::Dns => Box::new(dns::DnsProbe),
            ProtocolFamily::Database => Box::new(db::DatabaseProbe),
        }
    }
}

/// Pick the probe family for a discovered port, most specific match first:
/// a recognized service name from the deep scan beats the bare port-number
/// convention. Returns `None` for ports with no recognized convention.
pub fn select_family(record: &PortRecord) -> Option<ProtocolFamily> {
    family_for_service(&record.service).or_else(|| family_for_port(record.port))
}

fn family_for_service(name: &str) -> Option<ProtocolFamily> {
    match name {
        "http" | "https" | "http-proxy" | "http-alt" | "ssl/http" | "ssl/https" => {
            Some(ProtocolFamily::Web)
        }
        "ssh" => Some(ProtocolFamily::Ssh),
        "ftp" => Some(ProtocolFamily::Ftp),
        "domain" => Some(ProtocolFamily::Dns),
        "netbios-ssn" | "microsoft-ds" | "smb" => Some(ProtocolFamily::Smb),
        "mysql" | "postgresql" | "ms-sql-s" => Some(ProtocolFamily::Database),
        _ => None,
    }
}

fn family_for_port(port: u16) -> Option<ProtocolFamily> {
    match port {
        21 => Some(ProtocolFamily::Ftp),
        22 => Some(ProtocolFamily::Ssh),
        53 => Some(ProtocolFamily::Dns),
        80 | 443 | 8080 | 8443 => Some(ProtocolFamily::Web),
        139 | 445 => Some(ProtocolFamily::Smb),
        3306 | 5432 | 1433 => Some(ProtocolFamily::Database),
        _ => None,
    }
}

/// Connect with a bound, mapping the two failure modes onto the probe error
/// taxonomy.
pub(crate) async fn connect(
    host: &str,
    port: u16,
    bound: Duration,
) -> Result<TcpStream, ProbeFailure> {
    match timeout(bound, TcpStream::connect((host, port))).await {
        Err(_) => Err(ProbeFailure::timeout(format!(
            "connect to {host}:{port} timed out"
        ))),
        Ok(Err(e)) => Err(ProbeFailure::connect(format!(
            "connect to {host}:{port} failed: {e}"
        ))),
        Ok(Ok(stream)) => Ok(stream),
    }
}

/// Passive banner grab: connect and read whatever the service volunteers.
pub(crate) async fn grab_banner(
    host: &str,
    port: u16,
    bound: Duration,
) -> Result<String, ProbeFailure> {
    let mut stream = connect(host, port, bound).await?;
    let mut buf = vec![0u8; 1024];
    let n = match timeout(bound, stream.read(&mut buf)).await {
        Err(_) => {
            return Err(ProbeFailure::timeout(format!(
                "no banner from {host}:{port} within {bound:?}"
            )))
        }
        Ok(Err(e)) => return Err(ProbeFailure::connect(e.to_string())),
        Ok(Ok(n)) => n,
    };
    if n == 0 {
        return Err(ProbeFailure::protocol(format!(
            "{host}:{port} closed the connection without a banner"
        )));
    }
    buf.truncate(n);
    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}
