//! FTP enumeration: greeting banner plus an anonymous-login check spoken
//! directly over the control channel.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use super::{connect, Probe};
use crate::config::RunConfig;
use crate::types::{ProbeFailure, ProbeResult, ProtocolFamily, ScanTarget};

pub struct FtpProbe;

#[async_trait]
impl Probe for FtpProbe {
    fn family(&self) -> ProtocolFamily {
        ProtocolFamily::Ftp
    }

    async fn run(&self, target: &ScanTarget, port: u16, cfg: &RunConfig) -> ProbeResult {
        let mut result = ProbeResult::new(port, ProtocolFamily::Ftp);
        let bound = cfg.ftp_timeout;

        let mut stream = match connect(target.host(), port, bound).await {
            Ok(stream) => stream,
            Err(failure) => return result.fail(failure),
        };
        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half);

        // The greeting is the banner.
        let greeting = match read_reply(&mut reader, bound).await {
            Ok(reply) => reply,
            Err(failure) => return result.fail(failure),
        };
        result.set("banner", greeting.as_str());

        // Anonymous login on the same connection. A failure here keeps the
        // banner and is recorded as a note, not a probe error.
        let login = async {
            send(&mut write_half, b"USER anonymous\r\n", bound).await?;
            let user_reply = read_reply(&mut reader, bound).await?;
            if reply_code(&user_reply) == Some(230) {
                return Ok(true);
            }
            send(&mut write_half, b"PASS anonymous@\r\n", bound).await?;
            let pass_reply = read_reply(&mut reader, bound).await?;
            let _ = timeout(Duration::from_millis(500), write_half.write_all(b"QUIT\r\n")).await;
            Ok::<bool, ProbeFailure>(reply_code(&pass_reply) == Some(230))
        };
        match login.await {
            Ok(allowed) => result.set("anonymous_login", allowed),
            Err(failure) => result.note(format!("anonymous login check failed: {failure}")),
        }

        result
    }
}

async fn send(
    writer: &mut (impl AsyncWrite + Unpin),
    data: &[u8],
    bound: Duration,
) -> Result<(), ProbeFailure> {
    match timeout(bound, writer.write_all(data)).await {
        Err(_) => Err(ProbeFailure::timeout("ftp write timed out")),
        Ok(Err(e)) => Err(ProbeFailure::connect(e.to_string())),
        Ok(Ok(())) => Ok(()),
    }
}

/// Read one (possibly multi-line) FTP reply: lines continue until one starts
/// with a three-digit code followed by a space.
async fn read_reply<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    bound: Duration,
) -> Result<String, ProbeFailure> {
    let mut text = String::new();
    loop {
        let mut line = String::new();
        let n = match timeout(bound, reader.read_line(&mut line)).await {
            Err(_) => return Err(ProbeFailure::timeout("ftp reply timed out")),
            Ok(Err(e)) => return Err(ProbeFailure::connect(e.to_string())),
            Ok(Ok(n)) => n,
        };
        if n == 0 {
            break;
        }
        text.push_str(&line);
        let bytes = line.as_bytes();
        let terminal =
            bytes.len() >= 4 && bytes[..3].iter().all(|b| b.is_ascii_digit()) && bytes[3] == b' ';
        if terminal || text.len() > 4096 {
            break;
        }
    }
    if text.is_empty() {
        return Err(ProbeFailure::protocol("connection closed without an ftp reply"));
    }
    Ok(text.trim_end().to_string())
}

/// Code of a reply's terminal line.
fn reply_code(reply: &str) -> Option<u16> {
    reply.lines().last()?.get(..3)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_single_line_reply() {
        let mut reader = BufReader::new(&b"220 ProFTPD Server ready.\r\n"[..]);
        let reply = read_reply(&mut reader, Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply, "220 ProFTPD Server ready.");
        assert_eq!(reply_code(&reply), Some(220));
    }

    #[tokio::test]
    async fn reads_multi_line_reply() {
        let raw = &b"230-Welcome, archive user!\r\n230-Mirror of ftp.example.org\r\n230 Login successful.\r\n"[..];
        let mut reader = BufReader::new(raw);
        let reply = read_reply(&mut reader, Duration::from_secs(1)).await.unwrap();
        assert!(reply.contains("Mirror"));
        assert_eq!(reply_code(&reply), Some(230));
    }

    #[tokio::test]
    async fn empty_stream_is_a_protocol_error() {
        let mut reader = BufReader::new(&b""[..]);
        let err = read_reply(&mut reader, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::types::ProbeErrorKind::Protocol);
    }
}
