use std::io;
use std::time::Duration;

use thiserror::Error;

/// Scan-level failures. Only these ever reach the caller of a scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("could not resolve hostname '{host}': {reason}")]
    Resolution { host: String, reason: String },

    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),
}

impl ScanError {
    pub fn resolution(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Resolution {
            host: host.into(),
            reason: reason.to_string(),
        }
    }
}

/// Why a single connection attempt did not produce an open port.
///
/// These never leave the prober; they are folded into
/// [`PortState`](crate::types::PortState).
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection refused")]
    Refused,

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
}

impl ProbeError {
    /// Classify a failed connect. Active rejection by the peer counts as refused.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => Self::Refused,
            _ => Self::Transport(err),
        }
    }
}

/// Banner grab failures. An open port with a failed grab reports an empty banner.
#[derive(Debug, Error)]
pub enum BannerError {
    #[error("banner exchange timed out")]
    Timeout,

    #[error("banner exchange failed: {0}")]
    Io(#[from] io::Error),

    #[error("peer closed without sending data")]
    Empty,

    #[error("banner is not valid UTF-8")]
    NotText,
}
