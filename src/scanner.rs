use crate::error::ScanError;
use crate::ports::PortRange;
use crate::prober;
use crate::resolver::{Resolver, SystemResolver};
use crate::transport::{Connector, TcpConnector};
use crate::types::{
    PortState, ProbeOutcome, ProbeTask, ScanConfig, ScanProgress, ScanResult, ScanStatus,
    ScanTarget,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a single scan. `Failed` is only reachable from `Resolving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Resolving,
    Dispatching,
    Draining,
    Complete,
    Failed,
}

impl ScanPhase {
    /// Whether the coordinator may move from `self` to `next`.
    pub fn can_advance_to(self, next: ScanPhase) -> bool {
        use ScanPhase::*;
        matches!(
            (self, next),
            (Idle, Resolving)
                | (Resolving, Failed)
                | (Resolving, Dispatching)
                | (Resolving, Draining)
                | (Dispatching, Draining)
                | (Draining, Complete)
        )
    }
}

fn advance(phase: &mut ScanPhase, next: ScanPhase) {
    debug_assert!(phase.can_advance_to(next), "{phase:?} -> {next:?}");
    debug!(from = ?phase, to = ?next, "scan phase");
    *phase = next;
}

/// Resolve `target` and scan `range` on it with the system resolver and plain TCP.
///
/// - At most `config.concurrency()` probes are in flight at once; dispatch waits
///   on a `Semaphore` permit before each launch.
/// - Every connect and banner exchange is bounded by `config.timeout()`.
/// - `progress` sees every merged outcome together with the `(scanned, total)` counters.
/// - Cancelling `cancel` stops dispatch and yields an `Interrupted` result holding
///   the outcomes gathered before the signal.
pub async fn run_scan<F>(
    target: &str,
    range: &PortRange,
    config: &ScanConfig,
    cancel: CancellationToken,
    progress: F,
) -> Result<ScanResult, ScanError>
where
    F: FnMut(ScanProgress<'_>),
{
    let scanner = Scanner::new(config.clone());
    let target = scanner.resolve(target).await?;
    Ok(scanner.scan_target(target, range, cancel, progress).await)
}

/// The scan coordinator. Holds the resolver, the transport and the tunables; each
/// call to [`Scanner::scan_target`] owns its own outcome collection.
pub struct Scanner<R, C> {
    resolver: R,
    connector: Arc<C>,
    config: ScanConfig,
}

impl Scanner<SystemResolver, TcpConnector> {
    pub fn new(config: ScanConfig) -> Self {
        let resolver = SystemResolver::new(config.resolve_timeout());
        Self::with_transport(config, resolver, TcpConnector)
    }
}

impl<R: Resolver, C: Connector> Scanner<R, C> {
    pub fn with_transport(config: ScanConfig, resolver: R, connector: C) -> Self {
        Self {
            resolver,
            connector: Arc::new(connector),
            config,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Resolve a host into a [`ScanTarget`]. Failure here means nothing gets probed.
    pub async fn resolve(&self, host: &str) -> Result<ScanTarget, ScanError> {
        let mut phase = ScanPhase::Idle;
        advance(&mut phase, ScanPhase::Resolving);
        match self.resolver.resolve(host).await {
            Ok(address) => Ok(ScanTarget {
                host: host.trim().to_string(),
                address,
            }),
            Err(e) => {
                advance(&mut phase, ScanPhase::Failed);
                warn!(host, error = %e, "resolution failed");
                Err(e)
            }
        }
    }

    /// Resolve and scan in one call.
    pub async fn scan<F>(
        &self,
        host: &str,
        range: &PortRange,
        cancel: CancellationToken,
        progress: F,
    ) -> Result<ScanResult, ScanError>
    where
        F: FnMut(ScanProgress<'_>),
    {
        let target = self.resolve(host).await?;
        Ok(self.scan_target(target, range, cancel, progress).await)
    }

    /// Probe every port of `range` on an already resolved target.
    ///
    /// Returns only after every launched probe has finished, so the result is never partial
    /// unless the scan was interrupted.
    pub async fn scan_target<F>(
        &self,
        target: ScanTarget,
        range: &PortRange,
        cancel: CancellationToken,
        mut progress: F,
    ) -> ScanResult
    where
        F: FnMut(ScanProgress<'_>),
    {
        let started = Instant::now();
        let total = range.len();
        let target = Arc::new(target);
        let timeout = self.config.timeout();
        let sem = Arc::new(Semaphore::new(self.config.concurrency()));
        let mut set: JoinSet<ProbeOutcome> = JoinSet::new();
        let mut collector = OutcomeCollector::default();
        let mut interrupted = false;

        let mut pending = range.iter();
        let mut next_port = pending.next();
        let mut phase = ScanPhase::Resolving;
        if next_port.is_some() {
            advance(&mut phase, ScanPhase::Dispatching);
        } else {
            advance(&mut phase, ScanPhase::Draining);
        }
        info!(
            host = %target.host,
            address = %target.address,
            ports = total,
            concurrency = self.config.concurrency(),
            ?timeout,
            "scan started"
        );

        loop {
            if phase == ScanPhase::Draining && set.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !interrupted => {
                    // Probes that finished before the signal still count.
                    while let Some(joined) = set.try_join_next() {
                        collector.merge(joined, total, &mut progress);
                    }
                    interrupted = true;
                    if phase == ScanPhase::Dispatching {
                        advance(&mut phase, ScanPhase::Draining);
                    }
                    warn!(
                        scanned = collector.scanned,
                        in_flight = set.len(),
                        "scan interrupted; dispatch stopped"
                    );
                }

                Some(joined) = set.join_next() => {
                    if interrupted {
                        match joined {
                            Ok(outcome) => debug!(port = outcome.port, "discarding outcome after interrupt"),
                            Err(e) => warn!(error = %e, "probe task failed"),
                        }
                    } else {
                        collector.merge(joined, total, &mut progress);
                    }
                }

                permit = Arc::clone(&sem).acquire_owned(), if phase == ScanPhase::Dispatching => {
                    let (Ok(permit), Some(port)) = (permit, next_port) else {
                        advance(&mut phase, ScanPhase::Draining);
                        continue;
                    };
                    let task = ProbeTask {
                        target: Arc::clone(&target),
                        port,
                        timeout,
                    };
                    let connector = Arc::clone(&self.connector);
                    set.spawn(async move {
                        let _permit = permit; // released when the probe finishes
                        prober::probe(connector.as_ref(), &task).await
                    });

                    next_port = pending.next();
                    if next_port.is_none() {
                        advance(&mut phase, ScanPhase::Draining);
                        debug!(in_flight = set.len(), "all probes dispatched");
                    }
                }

                else => break,
            }
        }

        advance(&mut phase, ScanPhase::Complete);
        let status = if interrupted {
            ScanStatus::Interrupted
        } else {
            ScanStatus::Complete
        };
        let elapsed = started.elapsed();
        info!(
            open = collector.open.len(),
            scanned = collector.scanned,
            ?elapsed,
            ?status,
            "scan finished"
        );

        ScanResult {
            target: Arc::unwrap_or_clone(target),
            range: range.clone(),
            scanned: collector.scanned,
            total,
            closed: collector.closed,
            errors: collector.errors,
            open_ports: collector.into_sorted_open(),
            elapsed,
            status,
        }
    }
}

/// Outcome collection owned by the coordinator loop. Only that loop writes to it,
/// one outcome at a time.
#[derive(Debug, Default)]
struct OutcomeCollector {
    open: Vec<ProbeOutcome>,
    scanned: usize,
    closed: usize,
    errors: usize,
}

impl OutcomeCollector {
    /// Count a joined probe, show it to `progress`, then keep it if open.
    fn merge<F>(&mut self, joined: Result<ProbeOutcome, JoinError>, total: usize, progress: &mut F)
    where
        F: FnMut(ScanProgress<'_>),
    {
        match joined {
            Ok(outcome) => {
                self.count(&outcome);
                progress(ScanProgress {
                    scanned: self.scanned,
                    total,
                    outcome: Some(&outcome),
                });
                if outcome.is_open() {
                    self.open.push(outcome);
                }
            }
            Err(e) => {
                warn!(error = %e, "probe task failed");
                self.scanned += 1;
                self.errors += 1;
                progress(ScanProgress {
                    scanned: self.scanned,
                    total,
                    outcome: None,
                });
            }
        }
    }

    fn count(&mut self, outcome: &ProbeOutcome) {
        self.scanned += 1;
        match outcome.state {
            PortState::Open => info!(port = outcome.port, banner = ?outcome.banner, "open port"),
            PortState::Closed => self.closed += 1,
            PortState::Error => self.errors += 1,
        }
    }

    fn into_sorted_open(mut self) -> Vec<ProbeOutcome> {
        self.open.sort_by_key(|o| o.port);
        self.open.dedup_by_key(|o| o.port);
        self.open
    }
}
