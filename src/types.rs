use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::ports::PortRange;

/// Upper bound on simultaneous probes regardless of what the caller asks for.
pub const MAX_CONCURRENCY: usize = 5_000;

/// A host that has been resolved to a connectable address.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub host: String,
    pub address: IpAddr,
}

/// One unit of work: probe `port` on `target`, giving up after `timeout`.
#[derive(Debug, Clone)]
pub struct ProbeTask {
    pub target: Arc<ScanTarget>,
    pub port: u16,
    pub timeout: Duration,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Open,
    Closed,
    Error,
}

/// The result of probing one port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub port: u16,
    pub state: PortState,
    /// Present for open ports only; empty when the banner grab failed.
    pub banner: Option<String>,
}

impl ProbeOutcome {
    pub fn open(port: u16, banner: String) -> Self {
        Self {
            port,
            state: PortState::Open,
            banner: Some(banner),
        }
    }

    pub fn not_open(port: u16, state: PortState) -> Self {
        Self {
            port,
            state,
            banner: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}

/// Handed to the progress callback each time the coordinator merges an outcome.
#[derive(Debug, Clone, Copy)]
pub struct ScanProgress<'a> {
    pub scanned: usize,
    pub total: usize,
    /// `None` when the probe task died before producing an outcome.
    pub outcome: Option<&'a ProbeOutcome>,
}

impl ScanProgress<'_> {
    /// The merged outcome, if it is an open port.
    pub fn open_port(&self) -> Option<&ProbeOutcome> {
        self.outcome.filter(|o| o.is_open())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Complete,
    Interrupted,
}

/// Everything a finished (or interrupted) scan produced.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub target: ScanTarget,
    pub range: PortRange,
    /// Open ports only, ascending by port.
    pub open_ports: Vec<ProbeOutcome>,
    pub scanned: usize,
    pub total: usize,
    pub closed: usize,
    pub errors: usize,
    pub elapsed: Duration,
    pub status: ScanStatus,
}

impl ScanResult {
    pub fn open_count(&self) -> usize {
        self.open_ports.len()
    }

    pub fn is_interrupted(&self) -> bool {
        self.status == ScanStatus::Interrupted
    }
}

/// Tunables for a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    timeout: Duration,
    concurrency: usize,
    resolve_timeout: Duration,
}

impl ScanConfig {
    /// Validate and build a config. Concurrency above [`MAX_CONCURRENCY`] is clamped.
    pub fn new(timeout: Duration, concurrency: usize) -> Result<Self, ScanError> {
        if timeout.is_zero() {
            return Err(ScanError::InvalidConfig("timeout must be positive".into()));
        }
        if concurrency == 0 {
            return Err(ScanError::InvalidConfig(
                "concurrency must be at least 1".into(),
            ));
        }
        Ok(Self {
            timeout,
            concurrency: concurrency.min(MAX_CONCURRENCY),
            resolve_timeout: Duration::from_secs(5),
        })
    }

    /// Build a config from a timeout given in (fractional) seconds, as the CLI takes it.
    pub fn from_secs_f64(timeout_secs: f64, concurrency: usize) -> Result<Self, ScanError> {
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(ScanError::InvalidConfig(format!(
                "timeout must be a positive number of seconds, got {timeout_secs}"
            )));
        }
        let timeout = Duration::try_from_secs_f64(timeout_secs)
            .map_err(|e| ScanError::InvalidConfig(format!("timeout {timeout_secs}: {e}")))?;
        Self::new(timeout, concurrency)
    }

    pub fn with_resolve_timeout(mut self, resolve_timeout: Duration) -> Self {
        self.resolve_timeout = resolve_timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn resolve_timeout(&self) -> Duration {
        self.resolve_timeout
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            concurrency: 100,
            resolve_timeout: Duration::from_secs(5),
        }
    }
}
