use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use recon_rs::config::RunConfig;
use recon_rs::nmap::Nmap;
use recon_rs::types::{AggregateReport, ScanTarget};
use recon_rs::{discovery, dispatch, ports, report, tools};

/// recon-rs: single-target recon orchestrator running a two-phase nmap scan,
/// per-service enumeration probes, and JSON/HTML report generation.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "recon-rs",
    version,
    about = "Single-target recon orchestrator: two-phase nmap scan, per-service enumeration probes, JSON/HTML reports.",
    long_about = None
)]
struct Cli {
    /// Target IP or domain.
    target: String,

    /// Port specification for discovery (e.g. "1-1000" or "22,80,8000-8010").
    /// Default: the engine's top 1000 ports.
    #[arg(long)]
    ports: Option<String>,

    /// Directory for the generated reports.
    #[arg(long, default_value = "reports")]
    output_dir: PathBuf,

    /// Base file name for the reports (default: recon_<target>_<timestamp>).
    #[arg(long)]
    name: Option<String>,

    /// Max enumeration probes in flight at once.
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Skip external enumeration tools (feroxbuster, sublist3r).
    #[arg(long = "no-tools", default_value_t = false)]
    no_tools: bool,

    /// Write only the JSON report.
    #[arg(long = "skip-html", default_value_t = false)]
    skip_html: bool,

    /// Wordlist passed to feroxbuster.
    #[arg(long)]
    wordlist: Option<PathBuf>,

    /// Per-family probe timeout overrides, in milliseconds.
    #[arg(long = "web-timeout-ms")]
    web_timeout_ms: Option<u64>,
    #[arg(long = "ftp-timeout-ms")]
    ftp_timeout_ms: Option<u64>,
    #[arg(long = "ssh-timeout-ms")]
    ssh_timeout_ms: Option<u64>,
    #[arg(long = "smb-timeout-ms")]
    smb_timeout_ms: Option<u64>,
    #[arg(long = "dns-timeout-ms")]
    dns_timeout_ms: Option<u64>,
    #[arg(long = "db-timeout-ms")]
    db_timeout_ms: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let mut cfg = RunConfig {
            probe_concurrency: self.concurrency,
            external_tools: !self.no_tools,
            wordlist: self.wordlist.clone(),
            ..RunConfig::default()
        };
        if let Some(ms) = self.web_timeout_ms {
            cfg.web_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.ftp_timeout_ms {
            cfg.ftp_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.ssh_timeout_ms {
            cfg.ssh_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.smb_timeout_ms {
            cfg.smb_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.dns_timeout_ms {
            cfg.dns_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.db_timeout_ms {
            cfg.db_timeout = Duration::from_millis(ms);
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Fail fast on a bad port spec before anything touches the network.
    if let Some(spec) = cli.ports.as_deref() {
        ports::parse_port_spec(spec).context("invalid --ports specification")?;
    }
    let target = ScanTarget::new(&cli.target, cli.ports.clone())?;
    let cfg = cli.run_config();

    check_dependencies(&cfg)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            eprintln!("\nInterrupt received, finishing with partial results...");
            cancel.cancel();
        });
    }

    let engine = Nmap::from_config(&cfg);
    let records = discovery::discover(&engine, &target, &cancel)
        .await
        .context("port discovery failed")?;
    let result = dispatch::aggregate(&target, records, &cfg, &cancel).await;

    print_summary(&result);

    let base = cli.name.clone().unwrap_or_else(|| {
        format!(
            "recon_{}_{}",
            target.host(),
            report::filename_timestamp()
        )
    });
    let base = report::sanitize_base_name(&base);
    let paths = report::generate_reports(&result, &cli.output_dir, &base, !cli.skip_html)?;
    println!("Wrote JSON report to {}", paths.json.display());
    if let Some(html) = paths.html {
        println!("Wrote HTML report to {}", html.display());
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// nmap is a hard requirement; everything else degrades per probe.
fn check_dependencies(cfg: &RunConfig) -> Result<()> {
    if !tools::tool_available(&cfg.nmap_binary) {
        bail!(
            "{} not found on PATH; nmap is required for port discovery",
            cfg.nmap_binary
        );
    }
    for tool in ["dig", "smbclient"] {
        if !tools::tool_available(tool) {
            warn!("{tool} not installed; the matching enumeration step will be skipped");
        }
    }
    if cfg.external_tools {
        for tool in ["feroxbuster", "sublist3r"] {
            if !tools::tool_available(tool) {
                warn!("{tool} not installed; the matching enumeration step will be skipped");
            }
        }
    }
    Ok(())
}

fn print_summary(result: &AggregateReport) {
    println!(
        "\nOpen ports: {} (recorded: {})",
        result.open_count, result.total_ports
    );
    if result.ports.is_empty() {
        return;
    }

    let mut svc_w = "service".len();
    let mut ver_w = "version".len();
    for record in &result.ports {
        svc_w = svc_w.max(record.service.len());
        ver_w = ver_w.max(record.version.len().min(60));
    }
    let port_w = "port".len().max(5);
    let state_w = "state".len().max(15);

    println!(
        "{:<port_w$}  {:<state_w$}  {:<svc_w$}  {:<ver_w$}",
        "port",
        "state",
        "service",
        "version",
        port_w = port_w,
        state_w = state_w,
        svc_w = svc_w,
        ver_w = ver_w
    );
    println!(
        "{:-<port_w$}  {:-<state_w$}  {:-<svc_w$}  {:-<ver_w$}",
        "",
        "",
        "",
        "",
        port_w = port_w,
        state_w = state_w,
        svc_w = svc_w,
        ver_w = ver_w
    );
    for record in &result.ports {
        let mut version = record.version.clone();
        if version.len() > 60 {
            version.truncate(60);
        }
        println!(
            "{:<port_w$}  {:<state_w$}  {:<svc_w$}  {:<ver_w$}",
            record.port,
            record.state.to_string(),
            record.service,
            version,
            port_w = port_w,
            state_w = state_w,
            svc_w = svc_w,
            ver_w = ver_w
        );
    }

    let failed = result.probes.values().filter(|p| p.is_err()).count();
    println!(
        "\nProbed {} port(s), {} probe error(s)",
        result.probes.len(),
        failed
    );
}
