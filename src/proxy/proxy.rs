// ────────────────────────────────
// src/proxy/proxy.rs
// Forwards each inbound request to the next alive endpoint
// ────────────────────────────────

use super::endpoint::Endpoint;
use super::pool::ServerPool;
use crate::config::Config;
use crate::metrics::{MetricsCollector, Timer};
use crate::retry::{RetryDecision, RetryStrategy};
use http_body::{LengthLimitError, Limited};
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH};
use hyper::http::request::Parts;
use hyper::{Body, Client, Method, Request, Response, StatusCode, Uri, Version};
use hyper_tls::HttpsConnector;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Connection-scoped headers that must not travel past this hop.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct Proxy {
    pool: Arc<ServerPool>,
    client: Client<HttpsConnector<HttpConnector>, Body>,
    retry: RetryStrategy,
    request_timeout: Duration,
    max_body_bytes: usize,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Everything needed to replay one request against the same endpoint.
struct Outbound {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl Outbound {
    fn to_request(&self) -> Request<Body> {
        let mut req = Request::new(Body::from(self.body.clone()));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.version_mut() = self.version;
        *req.headers_mut() = self.headers.clone();
        req
    }
}

impl Proxy {
    pub fn new(
        config: &Config,
        pool: Arc<ServerPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let client = Client::builder().build::<_, Body>(HttpsConnector::new());

        Self {
            pool,
            client,
            retry: RetryStrategy::new(config.retry.clone()),
            request_timeout: config.proxy.request_timeout(),
            max_body_bytes: config.proxy.max_body_bytes,
            metrics,
        }
    }

    /// Route one request. The client address, when known, is read from the
    /// request extensions.
    pub async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let client_addr = req.extensions().get::<SocketAddr>().copied();
        let (parts, body) = req.into_parts();
        let body = self.read_body(&parts.headers, body).await.map_err(|err| {
            warn!("Rejecting request body: {}", err);
            err
        })?;

        let endpoint = match self.pool.get_next_server().await {
            Some(endpoint) => endpoint,
            None => {
                warn!("No endpoint available, rejecting request");
                if let Some(metrics) = &self.metrics {
                    metrics.record_no_endpoint();
                }
                return Err(ProxyError::NoHealthyBackends);
            }
        };

        let timer = Timer::new();
        let outbound = prepare(parts, body, &endpoint.url, client_addr)?;
        let label = endpoint.url.as_str();

        debug!(
            backend = %endpoint.url,
            request_id = ?outbound.headers.get(&X_REQUEST_ID),
            "Forwarding request"
        );

        let result = self
            .retry
            .execute_with_decision(
                |attempt| {
                    if attempt > 1 {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_retry(label);
                        }
                    }
                    self.send(outbound.to_request())
                },
                |err| match err {
                    ProxyError::Timeout => RetryDecision::NoRetry,
                    _ => RetryDecision::Retry,
                },
            )
            .await;

        match result {
            Ok(response) => {
                self.record(label, response.status(), &timer);
                Ok(response)
            }
            Err(err) => {
                if let ProxyError::BackendError(_) = err {
                    self.mark_down(&endpoint).await;
                }
                self.record(label, err.status(), &timer);
                Err(err)
            }
        }
    }

    async fn send(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        match timeout(self.request_timeout, self.client.request(req)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ProxyError::BackendError(e.to_string())),
            Err(_) => Err(ProxyError::Timeout),
        }
    }

    /// Buffer the body so it can be replayed on retry, refusing anything over
    /// `max_body_bytes` whether declared up front or only seen while reading.
    async fn read_body(&self, headers: &HeaderMap, body: Body) -> Result<Bytes, ProxyError> {
        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.map_or(false, |len| len > self.max_body_bytes as u64) {
            return Err(ProxyError::PayloadTooLarge(self.max_body_bytes));
        }

        hyper::body::to_bytes(Limited::new(body, self.max_body_bytes))
            .await
            .map_err(|e| {
                if e.is::<LengthLimitError>() {
                    ProxyError::PayloadTooLarge(self.max_body_bytes)
                } else {
                    ProxyError::BadRequest(e.to_string())
                }
            })
    }

    /// Passive feedback: a backend that kept failing is taken out of rotation
    /// until the next health check says otherwise.
    async fn mark_down(&self, endpoint: &Endpoint) {
        let up_since = endpoint.state_since().await;
        warn!(
            backend = %endpoint,
            %up_since,
            "Forwarding failed, marking endpoint down"
        );
        self.pool.mark_server_status(&endpoint.url, false).await;
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(endpoint.url.as_str(), false);
            metrics.update_backend_counts(self.pool.alive_count().await, self.pool.len());
        }
    }

    fn record(&self, label: &str, status: StatusCode, timer: &Timer) {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(label, status.as_u16(), timer.elapsed());
        }
    }
}

/// Turn the inbound request parts into a replayable outbound request.
fn prepare(
    parts: Parts,
    body: Bytes,
    base: &Url,
    client_addr: Option<SocketAddr>,
) -> Result<Outbound, ProxyError> {
    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    if !headers.contains_key(&X_REQUEST_ID) {
        if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            headers.insert(X_REQUEST_ID.clone(), id);
        }
    }
    if let Some(addr) = client_addr {
        append_forwarded_for(&mut headers, addr);
    }

    Ok(Outbound {
        method: parts.method,
        uri: forward_uri(base, &parts.uri)?,
        version: parts.version,
        headers,
        body,
    })
}

/// Drop the fixed hop-by-hop set plus any header named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in listed {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Rebase the incoming path and query onto the endpoint URL.
fn forward_uri(base: &Url, incoming: &Uri) -> Result<Uri, ProxyError> {
    let host = base
        .host_str()
        .ok_or_else(|| ProxyError::BadRequest(format!("endpoint {} has no host", base)))?;
    let authority = match base.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let prefix = base.path().trim_end_matches('/');
    let path_and_query = incoming
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{}://{}{}{}", base.scheme(), authority, prefix, path_and_query)
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::BadRequest(e.to_string()))
}

fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }
}

// Custom error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No healthy backends available")]
    NoHealthyBackends,

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BackendError(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let message = match &err {
            ProxyError::NoHealthyBackends => "Service not available",
            ProxyError::BackendError(_) => "Bad gateway",
            ProxyError::Timeout => "Gateway timeout",
            ProxyError::BadRequest(_) => "Bad request",
            ProxyError::PayloadTooLarge(_) => "Payload too large",
        };

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = err.status();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;

    /// A loopback address with nothing listening on it.
    fn dead_backend() -> Url {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr).parse().unwrap()
    }

    fn proxy_for(
        backends: Vec<Url>,
        max_body_bytes: usize,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> (Proxy, Arc<ServerPool>) {
        let mut config = Config::default();
        config.backends = backends.clone();
        config.retry.max_attempts = 1;
        config.proxy.max_body_bytes = max_body_bytes;
        let pool = Arc::new(ServerPool::from_urls(backends).unwrap());
        (Proxy::new(&config, pool.clone(), metrics), pool)
    }

    #[tokio::test]
    async fn test_mark_down_refreshes_healthy_count() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();
        metrics.update_backend_counts(2, 2);
        let (proxy, pool) = proxy_for(
            vec![dead_backend(), dead_backend()],
            1024,
            Some(metrics.clone()),
        );

        let first = proxy.handle(Request::new(Body::empty())).await;
        assert!(matches!(first, Err(ProxyError::BackendError(_))));
        assert_eq!(metrics.healthy_backends.get(), 1);

        let second = proxy.handle(Request::new(Body::empty())).await;
        assert!(matches!(second, Err(ProxyError::BackendError(_))));
        assert_eq!(pool.alive_count().await, 0);
        assert_eq!(metrics.healthy_backends.get(), 0);
        assert_eq!(metrics.total_backends.get(), 2);
    }

    #[tokio::test]
    async fn test_declared_oversize_body_is_rejected() {
        let (proxy, pool) = proxy_for(vec![dead_backend()], 16, None);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(CONTENT_LENGTH, "1000")
            .body(Body::empty())
            .unwrap();

        let err = proxy.handle(req).await.unwrap_err();

        assert!(matches!(err, ProxyError::PayloadTooLarge(16)));
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        // Rejected before any endpoint was contacted.
        assert!(pool.endpoints()[0].is_alive().await);
    }

    #[tokio::test]
    async fn test_undeclared_oversize_body_is_rejected() {
        let (proxy, pool) = proxy_for(vec![dead_backend()], 16, None);
        let chunks: Vec<Result<&'static str, std::io::Error>> =
            vec![Ok("0123456789"), Ok("0123456789")];
        let req = Request::new(Body::wrap_stream(futures::stream::iter(chunks)));

        let err = proxy.handle(req).await.unwrap_err();

        assert!(matches!(err, ProxyError::PayloadTooLarge(16)));
        assert!(pool.endpoints()[0].is_alive().await);
    }

    #[tokio::test]
    async fn test_body_within_limit_is_buffered() {
        let (proxy, _pool) = proxy_for(vec![dead_backend()], 16, None);
        let body = proxy
            .read_body(&HeaderMap::new(), Body::from("hello"))
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_hop_by_hop_headers_are_stripped() {
        let req = Request::builder()
            .uri("/chat")
            .header(CONNECTION, "keep-alive, X-Session-Hint")
            .header("keep-alive", "timeout=5")
            .header("te", "trailers")
            .header("upgrade", "websocket")
            .header("proxy-authorization", "Basic Zm9vOmJhcg==")
            .header("x-session-hint", "sticky")
            .header("x-tenant", "acme")
            .body(())
            .unwrap();
        let (parts, ()) = req.into_parts();
        let base: Url = "http://10.0.0.1:8080".parse().unwrap();

        let outbound = prepare(parts, Bytes::new(), &base, None).unwrap();

        let mut names: Vec<&str> = outbound.headers.keys().map(|n| n.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["x-request-id", "x-tenant"]);
    }

    #[test]
    fn test_forward_uri_keeps_path_and_query() {
        let base: Url = "http://10.0.0.1:8080".parse().unwrap();
        let incoming: Uri = "/api/items?page=2".parse().unwrap();
        assert_eq!(
            forward_uri(&base, &incoming).unwrap().to_string(),
            "http://10.0.0.1:8080/api/items?page=2"
        );
    }

    #[test]
    fn test_forward_uri_with_base_path_and_default_port() {
        let base: Url = "https://example.com/v1/".parse().unwrap();
        let incoming: Uri = "/users".parse().unwrap();
        assert_eq!(
            forward_uri(&base, &incoming).unwrap().to_string(),
            "https://example.com/v1/users"
        );
    }

    #[test]
    fn test_forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.1.1.1:5000".parse().unwrap());
        append_forwarded_for(&mut headers, "10.2.2.2:5000".parse().unwrap());
        assert_eq!(headers.get(&X_FORWARDED_FOR).unwrap(), "10.1.1.1, 10.2.2.2");
    }

    #[test]
    fn test_error_statuses() {
        let response: Response<Body> = ProxyError::NoHealthyBackends.into();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ProxyError::BackendError("refused".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(ProxyError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let response: Response<Body> = ProxyError::PayloadTooLarge(16).into();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
