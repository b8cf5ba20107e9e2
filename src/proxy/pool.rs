// src/proxy/pool.rs
use super::endpoint::Endpoint;
use crate::health::Prober;
use crate::load_balancer::RoundRobinCursor;
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Server pool needs at least one endpoint")]
    Empty,
}

/// Liveness of one endpoint as seen by a health check round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub url: Url,
    pub alive: bool,
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.alive { "up" } else { "down" };
        write!(f, "{} [{}]", self.url, status)
    }
}

/// Fixed, ordered set of endpoints plus the rotation cursor.
///
/// Built with `&mut self` methods, then shared behind an `Arc`. After that
/// the endpoint list is read-only; only the cursor and the per-endpoint
/// liveness flags change.
#[derive(Debug, Default)]
pub struct ServerPool {
    endpoints: Vec<Arc<Endpoint>>,
    cursor: RoundRobinCursor,
}

impl ServerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from configured backend URLs, keeping their order.
    pub fn from_urls<I>(urls: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = Url>,
    {
        let mut pool = Self::new();
        for url in urls {
            pool.add_endpoint(Endpoint::new(url));
        }

        if pool.is_empty() {
            return Err(PoolError::Empty);
        }

        info!("Server pool built with {} endpoints", pool.len());
        Ok(pool)
    }

    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoints.push(Arc::new(endpoint));
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    /// Advance the cursor and map it onto an endpoint index.
    ///
    /// Returns `None` only for an empty pool.
    pub fn next_index(&self) -> Option<usize> {
        match self.endpoints.len() {
            0 => None,
            len => Some(self.cursor.next_index(len)),
        }
    }

    /// Pick the alive endpoint nearest (forward, wrapping) to the cursor.
    ///
    /// Returns `None` when every endpoint is down.
    pub async fn get_next_server(&self) -> Option<Arc<Endpoint>> {
        let len = self.endpoints.len();
        let next = self.next_index()?;

        for i in next..next + len {
            let idx = i % len;
            let endpoint = &self.endpoints[idx];
            if endpoint.is_alive().await {
                if i != next {
                    self.cursor.advance_to(idx);
                }
                return Some(endpoint.clone());
            }
        }

        None
    }

    /// Set the liveness of the endpoint with this address.
    ///
    /// Returns `false` if no endpoint matches; nothing changes in that case.
    pub async fn mark_server_status(&self, url: &Url, alive: bool) -> bool {
        match self.endpoints.iter().find(|e| e.url == *url) {
            Some(endpoint) => {
                endpoint.set_alive(alive).await;
                true
            }
            None => false,
        }
    }

    /// Probe every endpoint and record the results.
    ///
    /// Probes run concurrently; results are applied and logged in pool order,
    /// one `"<address> [up|down]"` line per endpoint.
    pub async fn health_check(&self, prober: &dyn Prober) -> Vec<EndpointStatus> {
        let results = join_all(self.endpoints.iter().map(|e| prober.probe(&e.url))).await;

        let mut report = Vec::with_capacity(self.endpoints.len());
        for (endpoint, alive) in self.endpoints.iter().zip(results) {
            let since = endpoint.state_since().await;
            if endpoint.set_alive(alive).await {
                let previous = if alive { "down" } else { "up" };
                info!(
                    backend = %endpoint,
                    "Endpoint changed state, was {} since {}",
                    previous,
                    since
                );
            }

            let status = EndpointStatus {
                url: endpoint.url.clone(),
                alive,
            };
            info!("{}", status);
            report.push(status);
        }

        report
    }

    /// Number of endpoints currently marked alive.
    pub async fn alive_count(&self) -> usize {
        let mut alive = 0;
        for endpoint in &self.endpoints {
            if endpoint.is_alive().await {
                alive += 1;
            }
        }
        alive
    }
}
