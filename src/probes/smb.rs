//! SMB enumeration: null-session share listing via smbclient. The loose
//! text parsing of smbclient's share table stays inside this adapter.

use async_trait::async_trait;

use super::Probe;
use crate::config::RunConfig;
use crate::tools::{self, ToolError};
use crate::types::{ProbeErrorKind, ProbeFailure, ProbeResult, ProtocolFamily, ScanTarget};

pub struct SmbProbe;

#[async_trait]
impl Probe for SmbProbe {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Smb
    }

    async fn run(&self, target: &ScanTarget, port: u16, cfg: &RunConfig) -> ProbeResult {
        let mut result = ProbeResult::new(port, ProtocolFamily::Smb);

        if !tools::tool_available("smbclient") {
            result.note("smbclient not installed, share enumeration skipped");
            return result.fail(ProbeFailure::new(
                ProbeErrorKind::ToolUnavailable,
                "smbclient not available",
            ));
        }

        // -N forces a null session (no password prompt).
        let output = match tools::run_tool(
            "smbclient",
            &["-L", target.host(), "-N"],
            cfg.smb_timeout,
        )
        .await
        {
            Ok(output) => output,
            Err(ToolError::Timeout { after, .. }) => {
                return result.fail(ProbeFailure::timeout(format!(
                    "smbclient timed out after {after:?}"
                )))
            }
            Err(e) => return result.fail(ProbeFailure::other(e.to_string())),
        };

        if !output.succeeded(false) {
            return result.fail(ProbeFailure::other(format!(
                "smbclient exit {:?}: {}",
                output.status,
                output.stderr.trim()
            )));
        }

        let shares = parse_shares(&output.stdout);
        if shares.is_empty() {
            result.note("null session accepted but no listable shares");
        }
        result.set("shares", shares);
        result.set("null_session", true);
        result
    }
}

/// Pull share names out of smbclient's listing table, skipping the system
/// shares the original tooling ignores.
fn parse_shares(stdout: &str) -> Vec<String> {
    let mut shares = Vec::new();
    let mut in_table = false;

    for raw_line in stdout.lines() {
        let line = raw_line.trim();

        if line.contains("Sharename") {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }
        if line.is_empty() {
            // table ends at the first blank line
            break;
        }
        if line.starts_with('-') {
            continue;
        }
        if let Some(name) = line.split_whitespace().next() {
            if name != "IPC$" && name != "print$" {
                shares.push(name.to_string());
            }
        }
    }

    shares
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\n\
\tSharename       Type      Comment\n\
\t---------       ----      -------\n\
\tprint$          Disk      Printer Drivers\n\
\tADMIN$          Disk      Remote Admin\n\
\tC$              Disk      Default share\n\
\tIPC$            IPC       Remote IPC\n\
\tpublic          Disk      \n\
\n\
SMB1 disabled -- no workgroup available\n";

    #[test]
    fn parses_share_table() {
        assert_eq!(parse_shares(LISTING), vec!["ADMIN$", "C$", "public"]);
    }

    #[test]
    fn skips_output_without_table() {
        let out = "session setup failed: NT_STATUS_ACCESS_DENIED\n";
        assert!(parse_shares(out).is_empty());
    }
}
