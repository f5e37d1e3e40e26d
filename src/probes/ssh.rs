//! SSH enumeration: banner grab and software-version extraction.

use async_trait::async_trait;

use super::{grab_banner, Probe};
use crate::config::RunConfig;
use crate::types::{ProbeResult, ProtocolFamily, ScanTarget};

pub struct SshProbe;

#[async_trait]
impl Probe for SshProbe {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Ssh
    }

    async fn run(&self, target: &ScanTarget, port: u16, cfg: &RunConfig) -> ProbeResult {
        let mut result = ProbeResult::new(port, ProtocolFamily::Ssh);

        // SSH servers send their identification string immediately.
        let banner = match grab_banner(target.host(), port, cfg.ssh_timeout).await {
            Ok(banner) => banner,
            Err(failure) => return result.fail(failure),
        };
        result.set("banner", banner.as_str());

        if let Some(version) = parse_version(&banner) {
            result.set("version", version);
        } else {
            result.note("banner did not match the SSH identification format");
        }
        result
    }
}

/// Identification format is `SSH-protoversion-softwareversion comments`;
/// everything after the second dash is the software version.
fn parse_version(banner: &str) -> Option<&str> {
    if !banner.starts_with("SSH-") {
        return None;
    }
    banner.splitn(3, '-').nth(2)
}
