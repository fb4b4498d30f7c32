//! Turning a finished [`ScanResult`] into console text and report files.

use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::Path;

use ::time::{format_description::well_known, OffsetDateTime};
use anyhow::{Context, Result};
use serde::Serialize;

use crate::ports::PortRange;
use crate::services::service_name;
use crate::types::{ProbeOutcome, ScanResult, ScanStatus};

const RULE_WIDE: usize = 60;
const RULE_NARROW: usize = 50;

/// Persisted report layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// An open port as presented to users: service label plus parenthesised banner
/// (empty when no banner was captured).
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct OpenPort {
    pub port: u16,
    pub service: &'static str,
    pub banner: String,
}

impl OpenPort {
    /// `Port 22: SSH (SSH-2.0-OpenSSH)`
    pub fn line(&self) -> String {
        if self.banner.is_empty() {
            format!("Port {}: {}", self.port, self.service)
        } else {
            format!("Port {}: {} {}", self.port, self.service, self.banner)
        }
    }
}

/// Open ports of `result`, ascending.
pub fn open_ports(result: &ScanResult) -> Vec<OpenPort> {
    result
        .open_ports
        .iter()
        .map(|o| OpenPort {
            port: o.port,
            service: service_name(o.port),
            banner: parenthesised_banner(o),
        })
        .collect()
}

fn parenthesised_banner(outcome: &ProbeOutcome) -> String {
    match outcome.banner.as_deref() {
        Some(b) if !b.is_empty() => format!("({b})"),
        _ => String::new(),
    }
}

/// Live console line for an open port, printed as soon as it is merged:
/// `[+] Port 22: Open (SSH-2.0-OpenSSH)`.
pub fn found_line(outcome: &ProbeOutcome) -> String {
    let banner = parenthesised_banner(outcome);
    if banner.is_empty() {
        format!("[+] Port {}: Open", outcome.port)
    } else {
        format!("[+] Port {}: Open {banner}", outcome.port)
    }
}

/// Banner printed before any probing starts.
pub fn render_header(host: &str, range: &PortRange, started_at: &str) -> String {
    let rule = "=".repeat(RULE_WIDE);
    format!(
        "{rule}\nStarting port scan on: {host}\nPort range: {range}\nStarted at: {started_at}\n{rule}"
    )
}

/// Final console block: the normal summary, or the interrupted variant with whatever
/// was found before the signal.
pub fn render_summary(result: &ScanResult) -> String {
    let rule = "=".repeat(RULE_WIDE);
    let ports = open_ports(result);
    let mut out = String::new();

    let _ = writeln!(out, "\n{rule}");
    if result.is_interrupted() {
        let _ = writeln!(out, "SCAN INTERRUPTED");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(
            out,
            "[!] Scan interrupted by user after {} of {} ports",
            result.scanned, result.total
        );
        if ports.is_empty() {
            let _ = writeln!(out, "No open ports found before interruption.");
        } else {
            let _ = writeln!(out, "Open ports found before interruption ({}):", ports.len());
            for p in &ports {
                let _ = writeln!(out, "{}", p.line());
            }
        }
        return out;
    }

    let _ = writeln!(out, "SCAN RESULTS");
    let _ = writeln!(out, "{rule}");
    if ports.is_empty() {
        let _ = writeln!(out, "No open ports found in the specified range.");
    } else {
        let _ = writeln!(out, "Found {} open ports:", ports.len());
        for p in &ports {
            let _ = writeln!(out, "{}", p.line());
        }
    }
    let _ = writeln!(
        out,
        "\nScan completed in {:.2} seconds",
        result.elapsed.as_secs_f64()
    );
    out
}

/// Plain-text report file body.
pub fn render_text_report(result: &ScanResult, scanned_at: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Port Scan Results for {}", result.target.host);
    let _ = writeln!(out, "Address: {}", result.target.address);
    let _ = writeln!(out, "Scan Date: {scanned_at}");
    let _ = writeln!(out, "Port Range: {}", result.range);
    if result.is_interrupted() {
        let _ = writeln!(
            out,
            "Status: interrupted ({} of {} ports scanned)",
            result.scanned, result.total
        );
    }
    let _ = writeln!(out, "{}", "=".repeat(RULE_NARROW));

    let ports = open_ports(result);
    if ports.is_empty() {
        let _ = writeln!(out, "No open ports found.");
    }
    for p in &ports {
        let _ = writeln!(out, "{}", p.line());
    }
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    target: &'a str,
    address: String,
    scan_date: &'a str,
    port_range: &'a PortRange,
    status: ScanStatus,
    scanned: usize,
    total: usize,
    elapsed_secs: f64,
    open_ports: Vec<OpenPort>,
}

/// Write the report for `result` to `path`.
pub fn write_report(path: &Path, result: &ScanResult, format: ReportFormat) -> Result<()> {
    let scanned_at = now_rfc3339();
    match format {
        ReportFormat::Text => {
            fs::write(path, render_text_report(result, &scanned_at))
                .with_context(|| format!("failed to write report to {}", path.display()))?;
        }
        ReportFormat::Json => {
            let report = JsonReport {
                target: &result.target.host,
                address: result.target.address.to_string(),
                scan_date: &scanned_at,
                port_range: &result.range,
                status: result.status,
                scanned: result.scanned,
                total: result.total,
                elapsed_secs: result.elapsed.as_secs_f64(),
                open_ports: open_ports(result),
            };
            let file = File::create(path)
                .with_context(|| format!("failed to create report {}", path.display()))?;
            serde_json::to_writer_pretty(file, &report)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
        }
    }
    Ok(())
}

/// Current UTC time as RFC 3339.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
