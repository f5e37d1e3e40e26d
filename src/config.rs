use std::path::PathBuf;
use std::time::Duration;

use crate::types::ProtocolFamily;

/// Explicit configuration for one recon run.
///
/// Passed by reference into every stage and probe; there is no ambient
/// global state, so tests can inject arbitrary timeouts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Scan engine binary, normally just `nmap` resolved via PATH.
    pub nmap_binary: String,
    /// Wall-clock bound for the phase-1 quick scan.
    pub quick_scan_timeout: Duration,
    /// Wall-clock bound for the phase-2 version scan.
    pub version_scan_timeout: Duration,
    /// Max probes in flight at once during dispatch.
    pub probe_concurrency: usize,
    /// Run external enumeration tools (feroxbuster, sublist3r) when present.
    pub external_tools: bool,
    /// Optional wordlist handed to feroxbuster.
    pub wordlist: Option<PathBuf>,
    pub ferox_threads: u32,

    // Per-family socket timeouts.
    pub web_timeout: Duration,
    pub ftp_timeout: Duration,
    pub ssh_timeout: Duration,
    pub smb_timeout: Duration,
    pub dns_timeout: Duration,
    pub db_timeout: Duration,

    // Per-tool wall-clock bounds.
    pub ferox_timeout: Duration,
    pub sublist3r_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            nmap_binary: "nmap".to_string(),
            quick_scan_timeout: Duration::from_secs(300),
            version_scan_timeout: Duration::from_secs(600),
            probe_concurrency: 8,
            external_tools: true,
            wordlist: None,
            ferox_threads: 50,
            web_timeout: Duration::from_secs(10),
            ftp_timeout: Duration::from_secs(5),
            ssh_timeout: Duration::from_secs(5),
            smb_timeout: Duration::from_secs(30),
            dns_timeout: Duration::from_secs(30),
            db_timeout: Duration::from_secs(5),
            ferox_timeout: Duration::from_secs(300),
            sublist3r_timeout: Duration::from_secs(120),
        }
    }
}

impl RunConfig {
    /// Outer wall-clock budget the dispatcher grants one probe of `family`.
    ///
    /// Sized past the worst-case sum of the probe's individually-bounded
    /// steps, so expiry means the probe is genuinely stuck and the inner
    /// bounds (which preserve partial data) normally fire first.
    pub fn probe_budget(&self, family: ProtocolFamily) -> Duration {
        let slack = Duration::from_secs(5);
        match family {
            // two header fetches (https then http fallback), plus the tools
            ProtocolFamily::Web => {
                let mut budget = self.web_timeout * 4 + slack;
                if self.external_tools {
                    budget += self.ferox_timeout + self.sublist3r_timeout;
                }
                budget
            }
            // connect, greeting, USER, PASS exchanges
            ProtocolFamily::Ftp => self.ftp_timeout * 6 + slack,
            // connect plus banner read
            ProtocolFamily::Ssh => self.ssh_timeout * 2 + slack,
            // one smbclient run, already wall-clocked
            ProtocolFamily::Smb => self.smb_timeout + slack,
            // zone transfer plus six record queries
            ProtocolFamily::Dns => self.dns_timeout * 7 + slack,
            // connect plus a short handshake exchange
            ProtocolFamily::Database => self.db_timeout * 6 + slack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_budget_shrinks_without_tools() {
        let with_tools = RunConfig::default();
        let without = RunConfig {
            external_tools: false,
            ..RunConfig::default()
        };
        assert!(
            with_tools.probe_budget(ProtocolFamily::Web)
                > without.probe_budget(ProtocolFamily::Web)
        );
    }

    #[test]
    fn budget_covers_every_family() {
        let cfg = RunConfig::default();
        for family in [
            ProtocolFamily::Web,
            ProtocolFamily::Ftp,
            ProtocolFamily::Ssh,
            ProtocolFamily::Smb,
            ProtocolFamily::Dns,
            ProtocolFamily::Database,
        ] {
            assert!(cfg.probe_budget(family) > Duration::ZERO);
        }
    }
}
