//! Report assembly: one `AggregateReport` in, JSON and HTML files out.
//! Failed probes render as explicit error markers so a reader can tell
//! "probed and found nothing" from "probe failed".

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use time::format_description::well_known;
use time::OffsetDateTime;

use crate::types::{AggregateReport, PortState, ProbeResult};

/// RFC3339 UTC timestamp.
pub(crate) fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Compact timestamp for file names (`YYYYMMDD_HHMMSS`).
pub fn filename_timestamp() -> String {
    let fmt = time::format_description::parse(
        "[year][month][day]_[hour][minute][second]",
    )
    .expect("static format");
    OffsetDateTime::now_utc()
        .format(&fmt)
        .unwrap_or_else(|_| String::from("19700101_000000"))
}

/// Strip anything that does not belong in a file name.
pub fn sanitize_base_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct ReportPaths {
    pub json: PathBuf,
    pub html: Option<PathBuf>,
}

/// Write `<base>.json` (and `<base>.html` unless disabled) under `out_dir`.
pub fn generate_reports(
    report: &AggregateReport,
    out_dir: &Path,
    base: &str,
    with_html: bool,
) -> Result<ReportPaths> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create report directory {}", out_dir.display()))?;

    let json = out_dir.join(format!("{base}.json"));
    write_json(report, &json)?;

    let html = if with_html {
        let path = out_dir.join(format!("{base}.html"));
        fs::write(&path, render_html(report))
            .with_context(|| format!("failed to write HTML report to {}", path.display()))?;
        Some(path)
    } else {
        None
    };

    Ok(ReportPaths { json, html })
}

pub fn write_json(report: &AggregateReport, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create JSON report at {}", path.display()))?;
    serde_json::to_writer_pretty(file, report).context("failed to serialize report")?;
    Ok(())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn state_badge(state: PortState) -> &'static str {
    match state {
        PortState::Open => "badge open",
        PortState::Closed => "badge closed",
        _ => "badge filtered",
    }
}

/// Self-contained HTML document for one report.
pub fn render_html(report: &AggregateReport) -> String {
    let mut page = String::with_capacity(16 * 1024);
    let target = escape_html(&report.target);

    page.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n");
    page.push_str(&format!("<title>Recon Report - {target}</title>\n"));
    page.push_str(
        "<style>\n\
body { font-family: -apple-system, 'Segoe UI', sans-serif; margin: 0; background: #f0f2f5; color: #222; }\n\
.container { max-width: 1000px; margin: 24px auto; background: #fff; border-radius: 8px; box-shadow: 0 2px 12px rgba(0,0,0,.12); overflow: hidden; }\n\
header { background: #1e3c72; color: #fff; padding: 24px 32px; }\n\
header h1 { margin: 0 0 4px; font-size: 1.6em; }\n\
.meta { background: #f8f9fa; padding: 12px 32px; border-bottom: 1px solid #e3e6ea; display: flex; gap: 32px; flex-wrap: wrap; }\n\
.meta span b { color: #495057; }\n\
section { padding: 16px 32px; }\n\
h2 { color: #1e3c72; border-bottom: 2px solid #1e3c72; padding-bottom: 6px; }\n\
table { width: 100%; border-collapse: collapse; }\n\
th { text-align: left; background: #1e3c72; color: #fff; padding: 8px 12px; }\n\
td { padding: 8px 12px; border-bottom: 1px solid #e3e6ea; }\n\
.badge { padding: 2px 10px; border-radius: 10px; font-size: .85em; font-weight: 600; }\n\
.badge.open { background: #d4edda; color: #155724; }\n\
.badge.closed { background: #f8d7da; color: #721c24; }\n\
.badge.filtered { background: #fff3cd; color: #856404; }\n\
.probe { background: #f8f9fa; border-left: 4px solid #1e3c72; border-radius: 4px; padding: 12px 16px; margin: 12px 0; }\n\
.probe h3 { margin: 0 0 8px; color: #1e3c72; }\n\
.probe .error { background: #f8d7da; color: #721c24; padding: 8px 12px; border-radius: 4px; margin-bottom: 8px; }\n\
.probe .notes { color: #856404; margin: 8px 0; }\n\
pre { background: #fff; border: 1px solid #e3e6ea; border-radius: 4px; padding: 8px; overflow-x: auto; white-space: pre-wrap; font-size: .85em; max-height: 320px; }\n\
.none { color: #6c757d; font-style: italic; }\n\
footer { background: #f8f9fa; color: #6c757d; text-align: center; padding: 12px; border-top: 1px solid #e3e6ea; }\n\
</style>\n</head>\n<body>\n<div class=\"container\">\n",
    );

    page.push_str(&format!(
        "<header><h1>Recon Report</h1><div>{target}</div></header>\n"
    ));
    page.push_str(&format!(
        "<div class=\"meta\">\
<span><b>Target:</b> {target}</span>\
<span><b>Scan date:</b> {}</span>\
<span><b>Ports recorded:</b> {}</span>\
<span><b>Open:</b> {}</span>\
</div>\n",
        escape_html(&report.started_at),
        report.total_ports,
        report.open_count,
    ));

    // port table
    page.push_str("<section>\n<h2>Port Scan Results</h2>\n");
    if report.ports.is_empty() {
        page.push_str("<div class=\"none\">No ports recorded</div>\n");
    } else {
        page.push_str(
            "<table>\n<tr><th>Port</th><th>Proto</th><th>State</th><th>Service</th><th>Version</th></tr>\n",
        );
        for record in &report.ports {
            page.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td><span class=\"{}\">{}</span></td><td>{}</td><td>{}</td></tr>\n",
                record.port,
                record.transport,
                state_badge(record.state),
                escape_html(&record.state.to_string()),
                escape_html(if record.service.is_empty() { "unknown" } else { &record.service }),
                escape_html(if record.version.is_empty() { "-" } else { &record.version }),
            ));
        }
        page.push_str("</table>\n");
    }

    // nmap script output, per port
    for record in &report.ports {
        for script in &record.scripts {
            page.push_str(&format!(
                "<div class=\"probe\"><h3>Script {} (port {})</h3><pre>{}</pre></div>\n",
                escape_html(&script.id),
                record.port,
                escape_html(&script.output),
            ));
        }
    }
    page.push_str("</section>\n");

    // enumeration sections, ascending by port via the BTreeMap
    page.push_str("<section>\n<h2>Enumeration Results</h2>\n");
    if report.probes.is_empty() {
        page.push_str("<div class=\"none\">No ports received a probe</div>\n");
    }
    for probe in report.probes.values() {
        render_probe(&mut page, probe);
    }
    page.push_str("</section>\n");

    page.push_str(&format!(
        "<footer>Generated by recon-rs | {}</footer>\n</div>\n</body>\n</html>\n",
        escape_html(&report.started_at)
    ));
    page
}

fn render_probe(page: &mut String, probe: &ProbeResult) {
    page.push_str(&format!(
        "<div class=\"probe\">\n<h3>{} (port {})</h3>\n",
        escape_html(probe.family.tag()),
        probe.port
    ));

    if let Some(error) = &probe.error {
        page.push_str(&format!(
            "<div class=\"error\">probe failed ({:?}): {}</div>\n",
            error.kind,
            escape_html(&error.message)
        ));
    }
    if !probe.notes.is_empty() {
        page.push_str("<ul class=\"notes\">\n");
        for note in &probe.notes {
            page.push_str(&format!("<li>{}</li>\n", escape_html(note)));
        }
        page.push_str("</ul>\n");
    }

    if probe.fields.is_empty() && probe.error.is_none() {
        page.push_str("<div class=\"none\">nothing collected</div>\n");
    }
    for (key, value) in &probe.fields {
        page.push_str(&format!("<b>{}</b>\n", escape_html(key)));
        render_value(page, value);
    }
    page.push_str("</div>\n");
}

fn render_value(page: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            page.push_str(&format!("<pre>{}</pre>\n", escape_html(s)));
        }
        serde_json::Value::Array(items) if items.iter().all(|v| v.is_string()) => {
            page.push_str("<ul>\n");
            for item in items {
                page.push_str(&format!(
                    "<li>{}</li>\n",
                    escape_html(item.as_str().unwrap_or_default())
                ));
            }
            page.push_str("</ul>\n");
        }
        other => {
            let pretty = serde_json::to_string_pretty(other).unwrap_or_default();
            page.push_str(&format!("<pre>{}</pre>\n", escape_html(&pretty)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        PortRecord, ProbeFailure, ProbeResult, ProtocolFamily, Transport,
    };
    use std::collections::BTreeMap;

    fn sample_report() -> AggregateReport {
        let ports = vec![
            PortRecord {
                port: 22,
                transport: Transport::Tcp,
                state: PortState::Open,
                service: "ssh".into(),
                version: "OpenSSH 8.2p1".into(),
                scripts: Vec::new(),
            },
            PortRecord {
                port: 3306,
                transport: Transport::Tcp,
                state: PortState::Closed,
                service: String::new(),
                version: String::new(),
                scripts: Vec::new(),
            },
        ];
        let mut probes = BTreeMap::new();
        let mut ssh = ProbeResult::new(22, ProtocolFamily::Ssh);
        ssh.set("banner", "SSH-2.0-OpenSSH_8.2p1");
        probes.insert(22, ssh);
        AggregateReport {
            target: "10.0.0.5 <script>".into(),
            started_at: "2026-08-06T12:00:00Z".into(),
            total_ports: 2,
            open_count: 1,
            ports,
            probes,
        }
    }

    #[test]
    fn html_escapes_target_and_renders_ports() {
        let html = render_html(&sample_report());
        assert!(html.contains("10.0.0.5 &lt;script&gt;"));
        assert!(!html.contains("10.0.0.5 <script>"));
        assert!(html.contains("OpenSSH 8.2p1"));
        assert!(html.contains("badge closed"));
    }

    #[test]
    fn html_marks_failed_probes_explicitly() {
        let mut report = sample_report();
        let failed = ProbeResult::new(445, ProtocolFamily::Smb)
            .fail(ProbeFailure::timeout("smbclient timed out"));
        report.probes.insert(445, failed);
        let html = render_html(&report);
        assert!(html.contains("probe failed (Timeout)"));
        assert!(html.contains("smbclient timed out"));
    }

    #[test]
    fn json_round_trips() {
        let report = sample_report();
        let raw = serde_json::to_string_pretty(&report).unwrap();
        let back: AggregateReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn base_name_sanitization() {
        assert_eq!(sanitize_base_name("recon_10.0.0.5"), "recon_10.0.0.5");
        assert_eq!(sanitize_base_name("a/b\\c:d"), "a_b_c_d");
    }

    #[test]
    fn filename_timestamp_shape() {
        let ts = filename_timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(ts.as_bytes()[8], b'_');
    }
}
