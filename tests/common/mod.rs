//! Scripted in-memory network used by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reach_scan_rs::error::ScanError;
use reach_scan_rs::resolver::Resolver;
use reach_scan_rs::transport::Connector;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const TEST_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));

/// How a fake port answers a connection attempt.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Accepts; after reading the probe payload, replies with this text.
    /// An empty string closes without replying.
    Open(String),
    Refused,
    /// Never completes the handshake.
    Silent,
}

#[derive(Debug, Default)]
pub struct FakeNet {
    ports: HashMap<u16, Behavior>,
    delay: Duration,
    attempts: Mutex<Vec<u16>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeNet {
    /// Every port not listed refuses.
    pub fn new(ports: impl IntoIterator<Item = (u16, Behavior)>) -> Self {
        Self {
            ports: ports.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_open(open: &[u16]) -> Self {
        Self::new(open.iter().map(|&p| (p, Behavior::Open(format!("svc-{p}")))))
    }

    /// Hold each connect for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn into_connector(self) -> (FakeConnector, Arc<FakeNet>) {
        let net = Arc::new(self);
        (
            FakeConnector {
                net: Arc::clone(&net),
            },
            net,
        )
    }

    /// Ports in the order their connect attempts started.
    pub fn attempts(&self) -> Vec<u16> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct FakeConnector {
    net: Arc<FakeNet>,
}

impl Connector for FakeConnector {
    type Stream = DuplexStream;

    async fn connect(&self, addr: SocketAddr) -> io::Result<DuplexStream> {
        let net = &self.net;
        let port = addr.port();
        net.attempts.lock().unwrap().push(port);
        let now = net.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        net.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&net.in_flight);

        if !net.delay.is_zero() {
            tokio::time::sleep(net.delay).await;
        }

        match net.ports.get(&port).cloned().unwrap_or(Behavior::Refused) {
            Behavior::Refused => Err(io::ErrorKind::ConnectionRefused.into()),
            Behavior::Silent => {
                std::future::pending::<()>().await;
                Err(io::ErrorKind::TimedOut.into())
            }
            Behavior::Open(reply) => {
                let (client, mut server) = duplex(4096);
                tokio::spawn(async move {
                    let mut buf = [0u8; 256];
                    let _ = server.read(&mut buf).await;
                    if reply.is_empty() {
                        return;
                    }
                    let _ = server.write_all(reply.as_bytes()).await;
                    let mut sink = Vec::new();
                    let _ = server.read_to_end(&mut sink).await;
                });
                Ok(client)
            }
        }
    }
}

/// Resolver backed by a fixed table.
#[derive(Debug, Default)]
pub struct FakeResolver {
    hosts: HashMap<String, IpAddr>,
}

impl FakeResolver {
    pub fn with_host(host: &str, addr: IpAddr) -> Self {
        let mut hosts = HashMap::new();
        hosts.insert(host.to_string(), addr);
        Self { hosts }
    }
}

impl Resolver for FakeResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ScanError> {
        self.hosts
            .get(host)
            .copied()
            .ok_or_else(|| ScanError::resolution(host, "unknown host"))
    }
}
