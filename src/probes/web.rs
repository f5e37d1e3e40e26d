//! Web enumeration: a HEAD request over plain TCP or TLS for status line,
//! headers, and certificate details, plus optional directory/subdomain
//! enumeration through external tools.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use x509_parser::prelude::*;

use super::{connect, Probe};
use crate::config::RunConfig;
use crate::tools::{self, ToolError};
use crate::types::{ProbeFailure, ProbeResult, ProtocolFamily, ScanTarget};

pub struct WebProbe;

#[async_trait]
impl Probe for WebProbe {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Web
    }

    async fn run(&self, target: &ScanTarget, port: u16, cfg: &RunConfig) -> ProbeResult {
        let mut result = ProbeResult::new(port, ProtocolFamily::Web);
        let https = matches!(port, 443 | 8443);
        let scheme = if https { "https" } else { "http" };
        let url = format!("{scheme}://{}:{port}/", target.host());
        result.set("url", url.as_str());

        let head = match fetch_head(target.host(), port, https, cfg.web_timeout).await {
            Ok(head) => Some(head),
            Err(failure) if https => {
                // self-signed chaos aside, some "https" ports are plain http
                result.note(format!("https fetch failed ({failure}), retrying over http"));
                match fetch_head(target.host(), port, false, cfg.web_timeout).await {
                    Ok(head) => Some(head),
                    Err(second) => {
                        result.error = Some(second);
                        None
                    }
                }
            }
            Err(failure) => {
                result.error = Some(failure);
                None
            }
        };

        if let Some(head) = head {
            result.set("status_line", head.status_line.as_str());
            result.set(
                "headers",
                serde_json::to_value(&head.headers).unwrap_or_default(),
            );
            if let Some(cert) = head.certificate {
                result.set("certificate", cert);
            }
        }

        // External tools still run after a failed header fetch; whatever
        // they find is kept alongside the recorded error.
        if cfg.external_tools {
            run_feroxbuster(&mut result, &url, cfg).await;
            if target.is_domain() {
                run_sublist3r(&mut result, target.host(), cfg).await;
            }
        }

        result
    }
}

struct HeadResponse {
    status_line: String,
    headers: BTreeMap<String, String>,
    certificate: Option<serde_json::Value>,
}

async fn fetch_head(
    host: &str,
    port: u16,
    https: bool,
    bound: Duration,
) -> Result<HeadResponse, ProbeFailure> {
    let stream = connect(host, port, bound).await?;
    let request = format!(
        "HEAD / HTTP/1.1\r\nHost: {host}\r\nUser-Agent: recon-rs/0.1\r\nAccept: */*\r\nConnection: close\r\n\r\n"
    );

    if https {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| ProbeFailure::other(format!("tls init: {e}")))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let mut tls = match timeout(bound, connector.connect(host, stream)).await {
            Err(_) => return Err(ProbeFailure::timeout("tls handshake timed out")),
            Ok(Err(e)) => return Err(ProbeFailure::protocol(format!("tls handshake: {e}"))),
            Ok(Ok(tls)) => tls,
        };
        let certificate = peer_certificate_info(&tls);
        let raw = exchange(&mut tls, request.as_bytes(), bound).await?;
        let (status_line, headers) = parse_head(&raw)?;
        Ok(HeadResponse {
            status_line,
            headers,
            certificate,
        })
    } else {
        let mut stream = stream;
        let raw = exchange(&mut stream, request.as_bytes(), bound).await?;
        let (status_line, headers) = parse_head(&raw)?;
        Ok(HeadResponse {
            status_line,
            headers,
            certificate: None,
        })
    }
}

/// Write the request and read until the blank line ending the header block
/// (or EOF, or a sanity cap).
async fn exchange<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    request: &[u8],
    bound: Duration,
) -> Result<String, ProbeFailure> {
    match timeout(bound, stream.write_all(request)).await {
        Err(_) => return Err(ProbeFailure::timeout("http write timed out")),
        Ok(Err(e)) => return Err(ProbeFailure::connect(e.to_string())),
        Ok(Ok(())) => {}
    }

    let mut raw: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 2048];
    loop {
        let n = match timeout(bound, stream.read(&mut chunk)).await {
            Err(_) => {
                if raw.is_empty() {
                    return Err(ProbeFailure::timeout("http response timed out"));
                }
                break;
            }
            Ok(Err(e)) => {
                if raw.is_empty() {
                    return Err(ProbeFailure::connect(e.to_string()));
                }
                break;
            }
            Ok(Ok(n)) => n,
        };
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);
        if raw.windows(4).any(|w| w == b"\r\n\r\n") || raw.len() > 16384 {
            break;
        }
    }
    if raw.is_empty() {
        return Err(ProbeFailure::protocol("connection closed without a response"));
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn parse_head(raw: &str) -> Result<(String, BTreeMap<String, String>), ProbeFailure> {
    let mut lines = raw.lines();
    let status_line = lines
        .next()
        .filter(|l| l.starts_with("HTTP/"))
        .ok_or_else(|| ProbeFailure::protocol("malformed http status line"))?
        .trim()
        .to_string();

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for line in lines {
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        match headers.entry(name) {
            std::collections::btree_map::Entry::Occupied(mut e) => {
                let joined = e.get_mut();
                joined.push_str(", ");
                joined.push_str(&value);
            }
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(value);
            }
        }
    }
    Ok((status_line, headers))
}

fn peer_certificate_info(
    tls: &tokio_native_tls::TlsStream<tokio::net::TcpStream>,
) -> Option<serde_json::Value> {
    let der = tls.get_ref().peer_certificate().ok()??.to_der().ok()?;
    let (_, cert) = X509Certificate::from_der(&der).ok()?;

    let san: Vec<String> = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|gn| match gn {
                    GeneralName::DNSName(name) => Some(name.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    let mut info = serde_json::Map::new();
    info.insert("subject".into(), cert.subject().to_string().into());
    info.insert("issuer".into(), cert.issuer().to_string().into());
    info.insert(
        "not_after".into(),
        cert.validity().not_after.to_string().into(),
    );
    if !san.is_empty() {
        info.insert("san".into(), serde_json::Value::from(san));
    }
    Some(serde_json::Value::Object(info))
}

async fn run_feroxbuster(result: &mut ProbeResult, url: &str, cfg: &RunConfig) {
    if !tools::tool_available("feroxbuster") {
        result.note("feroxbuster not installed, directory enumeration skipped");
        return;
    }
    let threads = cfg.ferox_threads.to_string();
    let wordlist = cfg.wordlist.as_ref().map(|w| w.display().to_string());
    let mut args: Vec<&str> = vec!["-u", url, "-t", &threads, "--silent"];
    if let Some(w) = wordlist.as_deref() {
        args.push("-w");
        args.push(w);
    }

    match tools::run_tool("feroxbuster", &args, cfg.ferox_timeout).await {
        Ok(out) if out.succeeded(false) => {
            let directories: Vec<String> = out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            result.set("directories", directories);
        }
        Ok(out) => result.note(format!(
            "feroxbuster exit {:?}: {}",
            out.status,
            out.stderr.trim()
        )),
        Err(ToolError::Timeout { after, .. }) => {
            result.note(format!("feroxbuster timed out after {after:?}"))
        }
        Err(e) => result.note(format!("feroxbuster failed: {e}")),
    }
}

async fn run_sublist3r(result: &mut ProbeResult, domain: &str, cfg: &RunConfig) {
    if !tools::tool_available("sublist3r") {
        result.note("sublist3r not installed, subdomain enumeration skipped");
        return;
    }
    match tools::run_tool("sublist3r", &["-d", domain, "-t", "10"], cfg.sublist3r_timeout).await {
        // sublist3r reports non-zero exits on perfectly good runs; trust stdout
        Ok(out) if out.succeeded(true) => {
            result.set("sublist3r_output", out.stdout.trim());
        }
        Ok(out) => result.note(format!(
            "sublist3r exit {:?}: {}",
            out.status,
            out.stderr.trim()
        )),
        Err(ToolError::Timeout { after, .. }) => {
            result.note(format!("sublist3r timed out after {after:?}"))
        }
        Err(e) => result.note(format!("sublist3r failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[test]
    fn parses_status_and_headers() {
        let raw = "HTTP/1.1 200 OK\r\nServer: nginx/1.18.0\r\nContent-Type: text/html\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n";
        let (status, headers) = parse_head(raw).unwrap();
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert_eq!(headers.get("server").map(String::as_str), Some("nginx/1.18.0"));
        assert_eq!(headers.get("set-cookie").map(String::as_str), Some("a=1, b=2"));
    }

    #[test]
    fn rejects_non_http_response() {
        assert!(parse_head("220 smtp.example.com ESMTP\r\n").is_err());
    }

    #[tokio::test]
    async fn head_fetch_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 302 Found\r\nLocation: /login\r\nServer: test\r\n\r\n")
                .await;
        });

        let head = fetch_head("127.0.0.1", port, false, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(head.status_line, "HTTP/1.1 302 Found");
        assert_eq!(head.headers.get("location").map(String::as_str), Some("/login"));
        assert!(head.certificate.is_none());
    }
}
