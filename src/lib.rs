//! Library crate for reach-scan-rs: a bounded-concurrency TCP connect scanner.
pub mod error;
pub mod logging;
pub mod ports;
pub mod prober;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod services;
pub mod transport;
pub mod types;

pub use error::ScanError;
pub use ports::PortRange;
pub use scanner::{run_scan, Scanner};
pub use types::{ScanConfig, ScanProgress, ScanResult};
