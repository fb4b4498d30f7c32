use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use reach_scan_rs::report::{self, ReportFormat};
use reach_scan_rs::{logging, ports, PortRange, ScanConfig, Scanner};

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit status used when the user aborts a scan (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

/// scan: concurrent TCP reachability probe with banner grabbing.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scan",
    version,
    about = "Concurrent TCP reachability probe: finds open ports and grabs short banners.",
    long_about = None
)]
struct Cli {
    /// Target hostname or IP address.
    target: String,

    /// Port range: `a-b`, a comma list (scans min..max of the list) or a single port [default: 1-1024].
    #[arg(short = 'p', long = "ports", conflicts_with = "ports_file")]
    ports: Option<String>,

    /// File with one port or `a-b` range per line (`#` comments allowed).
    #[arg(long = "ports-file")]
    ports_file: Option<PathBuf>,

    /// Per-connection timeout in seconds (also bounds each banner read).
    #[arg(short = 't', long = "timeout", default_value_t = 1.0)]
    timeout: f64,

    /// Max concurrent connection attempts.
    #[arg(long, visible_alias = "threads", default_value_t = 100)]
    concurrency: usize,

    /// Save results to this file.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Layout of the saved report.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,

    /// Print a progress line every N scanned ports (0 disables).
    #[arg(long = "progress-every", default_value_t = 100)]
    progress_every: usize,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn port_range(&self) -> Result<PortRange> {
        match (&self.ports, &self.ports_file) {
            (_, Some(path)) => ports::load_ports_from_path(path),
            (Some(expr), None) => ports::parse_port_expr(expr),
            (None, None) => Ok(PortRange::default()),
        }
    }
}

/// Cancel `cancel` on the first signal. Returns `true` once a second signal arrives,
/// `false` if the signal source fails.
async fn relay_interrupts<S, Fut>(mut next_signal: S, cancel: CancellationToken) -> bool
where
    S: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if let Err(e) = next_signal().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        return false;
    }
    cancel.cancel();
    next_signal().await.is_ok()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;

    let range = cli.port_range()?;
    let config = ScanConfig::from_secs_f64(cli.timeout, cli.concurrency)?;

    println!(
        "{}",
        report::render_header(&cli.target, &range, &report::now_rfc3339())
    );

    let scanner = Scanner::new(config);
    let target = scanner.resolve(&cli.target).await?;
    println!("Scanning {} ({})", target.host, target.address);
    println!(
        "Probing {} ports with concurrency {} and timeout {:.2}s...",
        range.len(),
        scanner.config().concurrency(),
        scanner.config().timeout().as_secs_f64()
    );

    // Ctrl-C stops dispatch; probes already running finish within their timeouts.
    // A second Ctrl-C quits without waiting for them.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if relay_interrupts(tokio::signal::ctrl_c, cancel_ctrlc).await {
            eprintln!("[!] Second interrupt, exiting without waiting for running probes");
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    });

    let every = cli.progress_every;
    let results = scanner
        .scan_target(target, &range, cancel, |p| {
            if let Some(open) = p.open_port() {
                println!("{}", report::found_line(open));
            }
            if every > 0 && (p.scanned % every == 0 || p.scanned == p.total) {
                println!("Progress: {}/{} ports scanned", p.scanned, p.total);
            }
        })
        .await;

    print!("{}", report::render_summary(&results));

    if let Some(path) = cli.output.as_deref() {
        match report::write_report(path, &results, cli.format) {
            Ok(()) => println!("Results saved to {}", path.display()),
            Err(e) => {
                warn!(error = %e, "report not written");
                eprintln!("Error saving results: {e:#}");
            }
        }
    }

    if results.is_interrupted() {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["scan", "example.com"]);
        assert_eq!(cli.timeout, 1.0);
        assert_eq!(cli.concurrency, 100);
        assert_eq!(cli.format, ReportFormat::Text);
        assert_eq!(cli.port_range().unwrap(), PortRange::default());
    }

    #[test]
    fn threads_alias_and_port_expr() {
        let cli = Cli::parse_from(["scan", "10.0.0.1", "-p", "20-25", "--threads", "8", "-t", "0.5"]);
        assert_eq!(cli.concurrency, 8);
        assert_eq!(cli.port_range().unwrap().to_string(), "20-25");
    }

    #[tokio::test]
    async fn first_interrupt_cancels_second_one_quits() {
        let signals = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let source = Arc::clone(&signals);
        let relay = tokio::spawn(relay_interrupts(
            move || {
                let source = Arc::clone(&source);
                async move {
                    source.notified().await;
                    Ok(())
                }
            },
            cancel.clone(),
        ));

        signals.notify_one();
        timeout(Duration::from_secs(1), cancel.cancelled()).await.unwrap();
        assert!(!relay.is_finished());

        signals.notify_one();
        let quit = timeout(Duration::from_secs(1), relay).await.unwrap().unwrap();
        assert!(quit);
    }

    #[tokio::test]
    async fn broken_signal_source_does_not_cancel() {
        let cancel = CancellationToken::new();
        let quit = relay_interrupts(
            || async { Err::<(), _>(io::Error::other("no signal handler")) },
            cancel.clone(),
        )
        .await;
        assert!(!quit);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn ports_and_ports_file_conflict() {
        let res = Cli::try_parse_from(["scan", "h", "-p", "80", "--ports-file", "ports.txt"]);
        assert!(res.is_err());
    }
}
