//! DNS enumeration: zone-transfer attempt plus typed record queries against
//! the target's own resolver, all through dig. Output parsing stays here.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::Probe;
use crate::config::RunConfig;
use crate::tools::{self, ToolError};
use crate::types::{ProbeErrorKind, ProbeFailure, ProbeResult, ProtocolFamily, ScanTarget};

const RECORD_TYPES: [&str; 6] = ["A", "AAAA", "MX", "NS", "TXT", "SOA"];

pub struct DnsProbe;

#[async_trait]
impl Probe for DnsProbe {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Dns
    }

    async fn run(&self, target: &ScanTarget, port: u16, cfg: &RunConfig) -> ProbeResult {
        let mut result = ProbeResult::new(port, ProtocolFamily::Dns);

        if !tools::tool_available("dig") {
            result.note("dig not installed, dns enumeration skipped");
            return result.fail(ProbeFailure::new(
                ProbeErrorKind::ToolUnavailable,
                "dig not available",
            ));
        }

        let host = target.host();
        let server = format!("@{host}");
        let wait = format!("+time={}", cfg.dns_timeout.as_secs().max(1));

        // Zone transfer: only meaningful with a zone name, so domain targets
        // only. Refusal is the normal case, not an error.
        if target.is_domain() {
            let args = [server.as_str(), "axfr", host, wait.as_str(), "+tries=1"];
            match tools::run_tool("dig", &args, cfg.dns_timeout).await {
                Ok(output) if zone_transfer_succeeded(&output.stdout, output.status) => {
                    result.set("zone_transfer", output.stdout.trim());
                }
                Ok(_) => result.note("zone transfer refused"),
                Err(e) => result.note(format!("zone transfer attempt failed: {e}")),
            }
        }

        // Typed queries for the target's own name; reverse lookup when the
        // target is a bare address.
        let mut records: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if target.is_domain() {
            for rtype in RECORD_TYPES {
                let args = [
                    server.as_str(),
                    host,
                    "-t",
                    rtype,
                    "+short",
                    wait.as_str(),
                    "+tries=1",
                ];
                match tools::run_tool("dig", &args, cfg.dns_timeout).await {
                    Ok(output) if output.succeeded(false) => {
                        let values = parse_short_output(&output.stdout);
                        if !values.is_empty() {
                            records.insert(rtype.to_string(), values);
                        }
                    }
                    Ok(_) => {}
                    Err(ToolError::Timeout { .. }) => {
                        result.note(format!("{rtype} query timed out"));
                    }
                    Err(e) => {
                        result.note(format!("{rtype} query failed: {e}"));
                    }
                }
            }
        } else {
            let args = [server.as_str(), "-x", host, "+short", wait.as_str(), "+tries=1"];
            match tools::run_tool("dig", &args, cfg.dns_timeout).await {
                Ok(output) if output.succeeded(false) => {
                    let values = parse_short_output(&output.stdout);
                    if !values.is_empty() {
                        records.insert("PTR".to_string(), values);
                    }
                }
                Ok(_) => {}
                Err(e) => result.note(format!("reverse lookup failed: {e}")),
            }
        }

        if records.is_empty() {
            result.note("no records returned");
        } else {
            result.set(
                "records",
                serde_json::to_value(&records).unwrap_or_default(),
            );
        }
        result
    }
}

/// dig prints `; Transfer failed.` (and exits 0) on a refused AXFR.
fn zone_transfer_succeeded(stdout: &str, status: Option<i32>) -> bool {
    status == Some(0)
        && !stdout.trim().is_empty()
        && !stdout.contains("Transfer failed")
        && !stdout.contains("communications error")
}

fn parse_short_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_drops_comments_and_blanks() {
        let out = "10 mail.example.com.\n20 backup.example.com.\n;; Truncated\n\n";
        assert_eq!(
            parse_short_output(out),
            vec!["10 mail.example.com.", "20 backup.example.com."]
        );
    }

    #[test]
    fn refused_axfr_is_not_a_transfer() {
        let refused = "; <<>> DiG 9.18 <<>> @ns1.example.com axfr example.com\n; Transfer failed.\n";
        assert!(!zone_transfer_succeeded(refused, Some(0)));
    }

    #[test]
    fn full_axfr_is_a_transfer() {
        let full = "example.com.  3600 IN SOA ns1.example.com. admin.example.com. 1 7200 900 1209600 86400\n\
example.com.  3600 IN NS ns1.example.com.\n\
www.example.com. 3600 IN A 10.0.0.5\n";
        assert!(zone_transfer_succeeded(full, Some(0)));
        assert!(!zone_transfer_succeeded(full, Some(9)));
    }
}
