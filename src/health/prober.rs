// src/health/prober.rs
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::warn;
use url::Url;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Answers "does this address accept connections right now?".
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &Url) -> bool;
}

/// Bare TCP dial. No bytes are exchanged; the stream is dropped on success.
#[derive(Debug, Clone, Copy)]
pub struct TcpProber {
    dial_timeout: Duration,
}

impl TcpProber {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(DEFAULT_DIAL_TIMEOUT)
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, url: &Url) -> bool {
        is_reachable(url, self.dial_timeout).await
    }
}

/// Attempts a TCP handshake with the URL's host and port within `dial_timeout`.
///
/// Failures are logged and reported as `false`, never as errors.
pub async fn is_reachable(url: &Url, dial_timeout: Duration) -> bool {
    let (host, port) = match (url.host_str(), url.port_or_known_default()) {
        (Some(host), Some(port)) => (host, port),
        _ => {
            warn!(%url, "Site unreachable, error: no host or port");
            return false;
        }
    };

    // IPv6 literals come back bracketed from host_str
    let host = host.trim_start_matches('[').trim_end_matches(']');

    match timeout(dial_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            warn!(%url, %err, "Site unreachable");
            false
        }
        Err(_) => {
            warn!(%url, timeout = ?dial_timeout, "Site unreachable, dial timed out");
            false
        }
    }
}
