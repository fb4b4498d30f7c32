//! Single-port probing: one bounded connect, then at most one banner exchange.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;
use tracing::{debug, trace};

use crate::error::{BannerError, ProbeError};
use crate::transport::Connector;
use crate::types::{PortState, ProbeOutcome, ProbeTask};

/// Ports that get an HTTP request instead of a bare line terminator.
pub const WEB_PORTS: [u16; 4] = [80, 443, 8080, 8443];

/// Most bytes read from a peer during a banner grab.
pub const BANNER_READ_LIMIT: usize = 1024;

/// Banners longer than this many characters are cut and marked with `...`.
pub const BANNER_DISPLAY_CHARS: usize = 50;

/// Probe one port. Never fails: every error becomes part of the outcome.
///
/// The connection is dropped before returning on every path.
pub async fn probe<C: Connector>(connector: &C, task: &ProbeTask) -> ProbeOutcome {
    let port = task.port;
    let mut stream = match connect(connector, task).await {
        Ok(stream) => stream,
        Err(ProbeError::Refused) => {
            trace!(port, "closed");
            return ProbeOutcome::not_open(port, PortState::Closed);
        }
        Err(e) => {
            trace!(port, error = %e, "not open");
            return ProbeOutcome::not_open(port, PortState::Error);
        }
    };

    let payload = probe_payload(&task.target.host, port);
    let banner = match grab_banner(&mut stream, &payload, task.timeout).await {
        Ok(banner) => banner,
        Err(e) => {
            trace!(port, error = %e, "banner grab failed");
            String::new()
        }
    };
    debug!(port, %banner, "open");
    ProbeOutcome::open(port, banner)
}

async fn connect<C: Connector>(connector: &C, task: &ProbeTask) -> Result<C::Stream, ProbeError> {
    let addr = SocketAddr::new(task.target.address, task.port);
    match time::timeout(task.timeout, connector.connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProbeError::from_io(e)),
        Err(_) => Err(ProbeError::Timeout(task.timeout)),
    }
}

/// Bytes sent to an open port to coax out a banner.
pub fn probe_payload(host: &str, port: u16) -> Vec<u8> {
    if WEB_PORTS.contains(&port) {
        format!("GET / HTTP/1.1\r\nHost: {host}\r\n\r\n").into_bytes()
    } else {
        b"\r\n".to_vec()
    }
}

/// Send `payload`, then do one read of up to [`BANNER_READ_LIMIT`] bytes.
/// Both steps are individually bounded by `timeout`.
pub async fn grab_banner<S>(
    stream: &mut S,
    payload: &[u8],
    timeout: Duration,
) -> Result<String, BannerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    time::timeout(timeout, stream.write_all(payload))
        .await
        .map_err(|_| BannerError::Timeout)??;

    let mut buf = vec![0u8; BANNER_READ_LIMIT];
    let n = time::timeout(timeout, stream.read(&mut buf))
        .await
        .map_err(|_| BannerError::Timeout)??;
    if n == 0 {
        return Err(BannerError::Empty);
    }
    buf.truncate(n);

    let text = match String::from_utf8(buf) {
        Ok(text) => text,
        // A multi-byte character cut off by the read limit is not a decode failure.
        Err(e) if e.utf8_error().error_len().is_none() => {
            let valid = e.utf8_error().valid_up_to();
            let mut bytes = e.into_bytes();
            bytes.truncate(valid);
            String::from_utf8(bytes).map_err(|_| BannerError::NotText)?
        }
        Err(_) => return Err(BannerError::NotText),
    };
    Ok(format_banner(&text))
}

/// Normalise raw banner text for single-line display: trim, cap at
/// [`BANNER_DISPLAY_CHARS`] characters, then escape CR/LF.
pub fn format_banner(raw: &str) -> String {
    let trimmed = raw.trim();
    let shown = match trimmed.char_indices().nth(BANNER_DISPLAY_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    };
    shown.replace('\r', "\\r").replace('\n', "\\n")
}
