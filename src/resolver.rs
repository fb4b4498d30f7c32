//! Host name resolution.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use tokio::time;
use tracing::debug;

use crate::error::ScanError;

/// Maps a host string to a single address to scan.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> impl Future<Output = Result<IpAddr, ScanError>> + Send;
}

/// Resolver backed by the operating system's name service.
///
/// IP literals are returned as-is. For names, the first IPv4 address wins;
/// if there is none, the first address of any family is used.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ScanError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ScanError::resolution(host, "empty host name"));
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        let lookup = time::timeout(self.timeout, tokio::net::lookup_host((host, 0)))
            .await
            .map_err(|_| {
                ScanError::resolution(host, format!("lookup timed out after {:?}", self.timeout))
            })?
            .map_err(|e| ScanError::resolution(host, e))?;

        let addrs: Vec<IpAddr> = lookup.map(|sa| sa.ip()).collect();
        debug!(host, ?addrs, "resolved");
        pick_address(&addrs).ok_or_else(|| ScanError::resolution(host, "no addresses found"))
    }
}

fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}
