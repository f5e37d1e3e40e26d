//! Database enumeration: a small slice of each wire protocol, enough to
//! identify the server and classify its authentication posture without any
//! client library.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{connect, Probe};
use crate::config::RunConfig;
use crate::types::{AuthCheck, ProbeFailure, ProbeResult, ProtocolFamily, ScanTarget};

pub struct DatabaseProbe;

#[async_trait]
impl Probe for DatabaseProbe {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Database
    }

    async fn run(&self, target: &ScanTarget, port: u16, cfg: &RunConfig) -> ProbeResult {
        let mut result = ProbeResult::new(port, ProtocolFamily::Database);
        let kind = db_kind(port);
        result.set("db_type", kind);

        match kind {
            "mysql" => mysql_probe(&mut result, target, port, cfg.db_timeout).await,
            "postgresql" => postgres_probe(&mut result, target, port, cfg.db_timeout).await,
            "mssql" => mssql_probe(&mut result, target, port, cfg.db_timeout).await,
            _ => {
                return result.fail(ProbeFailure::protocol(format!(
                    "no handshake known for database port {port}"
                )))
            }
        }
        result
    }
}

fn db_kind(port: u16) -> &'static str {
    match port {
        3306 => "mysql",
        5432 => "postgresql",
        1433 => "mssql",
        _ => "unknown",
    }
}

fn set_auth(result: &mut ProbeResult, auth: AuthCheck) {
    result.set(
        "auth_required",
        serde_json::to_value(auth).unwrap_or_default(),
    );
}

/// MySQL volunteers a handshake packet on connect: 4-byte header, protocol
/// version byte, then a null-terminated server version string.
async fn mysql_probe(result: &mut ProbeResult, target: &ScanTarget, port: u16, bound: Duration) {
    let mut stream = match connect(target.host(), port, bound).await {
        Ok(stream) => stream,
        Err(failure) => {
            set_auth(result, AuthCheck::NotChecked);
            result.error = Some(failure);
            return;
        }
    };

    let mut buf = vec![0u8; 1024];
    let n = match timeout(bound, stream.read(&mut buf)).await {
        Err(_) => {
            set_auth(result, AuthCheck::NotChecked);
            result.error = Some(ProbeFailure::timeout("no mysql handshake received"));
            return;
        }
        Ok(Err(e)) => {
            set_auth(result, AuthCheck::NotChecked);
            result.error = Some(ProbeFailure::connect(e.to_string()));
            return;
        }
        Ok(Ok(n)) => n,
    };
    buf.truncate(n);

    match parse_mysql_handshake(&buf) {
        Some(version) => {
            result.set("banner", version.as_str());
            result.set("version", mysql_version(&version));
        }
        None => {
            // keep a hex prefix so the evidence survives a parse failure
            result.set("banner", hex_prefix(&buf, 50));
            result.note("mysql handshake did not parse, raw prefix kept");
        }
    }
    set_auth(result, AuthCheck::NotChecked);
    result.note("credential check not performed (no client handshake response sent)");
}

/// Lift the server version out of the initial handshake packet.
fn parse_mysql_handshake(data: &[u8]) -> Option<String> {
    // header: 3-byte length + sequence byte; payload starts with protocol
    // version 0x0a for every modern server
    let payload = data.get(4..)?;
    if *payload.first()? != 0x0a {
        return None;
    }
    let rest = &payload[1..];
    let end = rest.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&rest[..end]).into_owned())
}

/// `5.7.33-0ubuntu0.18.04.1` reduces to `5.7.33`.
fn mysql_version(banner: &str) -> &str {
    banner.split('-').next().unwrap_or(banner)
}

fn hex_prefix(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

/// Postgres: send a StartupMessage for user `postgres` and classify the
/// reply. AuthenticationOk without a password means the server is wide
/// open; any auth request means credentials are enforced.
async fn postgres_probe(result: &mut ProbeResult, target: &ScanTarget, port: u16, bound: Duration) {
    let mut stream = match connect(target.host(), port, bound).await {
        Ok(stream) => stream,
        Err(failure) => {
            set_auth(result, AuthCheck::NotChecked);
            result.error = Some(failure);
            return;
        }
    };

    match timeout(bound, stream.write_all(&pg_startup_message("postgres"))).await {
        Err(_) => {
            set_auth(result, AuthCheck::NotChecked);
            result.error = Some(ProbeFailure::timeout("postgres startup write timed out"));
            return;
        }
        Ok(Err(e)) => {
            set_auth(result, AuthCheck::NotChecked);
            result.error = Some(ProbeFailure::connect(e.to_string()));
            return;
        }
        Ok(Ok(())) => {}
    }

    match read_pg_message(&mut stream, bound).await {
        Ok((b'R', payload)) => {
            let code = payload
                .get(..4)
                .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]));
            if code == Some(0) {
                set_auth(result, AuthCheck::NotRequired);
                result.note("server accepted user postgres without a password");
                // the server now streams ParameterStatus messages; one of
                // them carries server_version
                if let Some(version) = pg_read_server_version(&mut stream, bound).await {
                    result.set("version", version);
                }
            } else {
                set_auth(result, AuthCheck::Required);
            }
        }
        Ok((b'E', payload)) => {
            set_auth(result, AuthCheck::Required);
            if let Some(message) = pg_error_message(&payload) {
                result.set("banner", message);
            }
        }
        Ok((tag, _)) => {
            set_auth(result, AuthCheck::NotChecked);
            result.error = Some(ProbeFailure::protocol(format!(
                "unexpected postgres reply tag {:?}",
                tag as char
            )));
        }
        Err(failure) => {
            set_auth(result, AuthCheck::NotChecked);
            result.error = Some(failure);
        }
    }
}

fn pg_startup_message(user: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&196608i32.to_be_bytes()); // protocol 3.0
    body.extend_from_slice(b"user\0");
    body.extend_from_slice(user.as_bytes());
    body.push(0);
    body.extend_from_slice(b"database\0");
    body.extend_from_slice(user.as_bytes());
    body.push(0);
    body.push(0);

    let mut message = ((body.len() + 4) as i32).to_be_bytes().to_vec();
    message.extend_from_slice(&body);
    message
}

/// One backend message: tag byte, i32 length (self-inclusive), payload.
async fn read_pg_message(
    stream: &mut TcpStream,
    bound: Duration,
) -> Result<(u8, Vec<u8>), ProbeFailure> {
    let mut header = [0u8; 5];
    read_exact_bounded(stream, &mut header, bound).await?;
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if !(4..=65536).contains(&len) {
        return Err(ProbeFailure::protocol(format!(
            "postgres message length {len} out of range"
        )));
    }
    let mut payload = vec![0u8; (len - 4) as usize];
    read_exact_bounded(stream, &mut payload, bound).await?;
    Ok((header[0], payload))
}

async fn read_exact_bounded(
    stream: &mut TcpStream,
    buf: &mut [u8],
    bound: Duration,
) -> Result<(), ProbeFailure> {
    match timeout(bound, stream.read_exact(buf)).await {
        Err(_) => Err(ProbeFailure::timeout("postgres read timed out")),
        Ok(Err(e)) => Err(ProbeFailure::connect(e.to_string())),
        Ok(Ok(_)) => Ok(()),
    }
}

/// After AuthenticationOk the backend streams ParameterStatus ('S')
/// messages until ReadyForQuery ('Z'); `server_version` is one of them.
async fn pg_read_server_version(stream: &mut TcpStream, bound: Duration) -> Option<String> {
    for _ in 0..16 {
        let (tag, payload) = read_pg_message(stream, bound).await.ok()?;
        match tag {
            b'S' => {
                let mut parts = payload.split(|&b| b == 0);
                let key = parts.next()?;
                if key == b"server_version" {
                    let value = parts.next()?;
                    return Some(String::from_utf8_lossy(value).into_owned());
                }
            }
            b'Z' => return None,
            _ => {}
        }
    }
    None
}

/// ErrorResponse payload: sequence of (field-type byte, cstring) pairs;
/// 'M' is the human-readable message.
fn pg_error_message(payload: &[u8]) -> Option<String> {
    let mut rest = payload;
    while let Some((&field, tail)) = rest.split_first() {
        if field == 0 {
            break;
        }
        let end = tail.iter().position(|&b| b == 0)?;
        if field == b'M' {
            return Some(String::from_utf8_lossy(&tail[..end]).into_owned());
        }
        rest = &tail[end + 1..];
    }
    None
}

/// No TDS client in this stack: report reachability honestly instead of
/// fabricating version data.
async fn mssql_probe(result: &mut ProbeResult, target: &ScanTarget, port: u16, bound: Duration) {
    match connect(target.host(), port, bound).await {
        Ok(_) => {
            result.set("accessible", true);
            set_auth(result, AuthCheck::NotChecked);
            result.note("TDS version probe not performed");
        }
        Err(failure) => {
            result.set("accessible", false);
            set_auth(result, AuthCheck::NotChecked);
            result.error = Some(failure);
        }
    }
}
