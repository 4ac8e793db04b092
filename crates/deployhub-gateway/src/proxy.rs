//! Reverse proxy.
//!
//! Forwards a matched request to its upstream with the same method, body
//! and headers, minus hop-by-hop headers, and relays the upstream status,
//! headers and body back. Unmatched requests never reach an upstream.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{
        header::{self, HeaderName, HeaderValue},
        HeaderMap,
    },
    response::Response,
};
use deployhub_core::{Counter, MetricsRegistry};
use futures::TryStreamExt;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::route_table::RouteTable;

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: &[&str] = &[
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

#[derive(Debug, Clone, Default)]
struct ProxyMetrics {
    requests: Counter,
    unrouted: Counter,
    upstream_timeouts: Counter,
    upstream_errors: Counter,
}

/// Forwards requests according to a route table.
pub struct Proxy {
    client: reqwest::Client,
    table: RouteTable,
    body_limit: usize,
    timeout: Duration,
    metrics: ProxyMetrics,
}

impl Proxy {
    /// Build a proxy for `config`.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let table = config.route_table()?;
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .connect_timeout(config.upstream_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            table,
            body_limit: config.body_limit,
            timeout: config.upstream_timeout,
            metrics: ProxyMetrics::default(),
        })
    }

    /// Record into `metrics`.
    pub fn with_metrics(mut self, metrics: &MetricsRegistry) -> Self {
        self.metrics = ProxyMetrics {
            requests: metrics.counter("proxy_requests_total", "Requests forwarded upstream"),
            unrouted: metrics.counter("proxy_unrouted_total", "Requests with no matching route"),
            upstream_timeouts: metrics
                .counter("proxy_upstream_timeouts_total", "Upstream requests that timed out"),
            upstream_errors: metrics
                .counter("proxy_upstream_errors_total", "Upstream requests that failed"),
        };
        self
    }

    /// The route table.
    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Forward one request.
    pub async fn forward(&self, request: Request) -> Result<Response, GatewayError> {
        let (parts, body) = request.into_parts();

        let Some(target) = self.table.resolve(parts.uri.path(), parts.uri.query()) else {
            self.metrics.unrouted.inc();
            tracing::debug!(path = parts.uri.path(), "no route");
            return Err(GatewayError::NoRoute(parts.uri.path().to_string()));
        };

        let body = axum::body::to_bytes(body, self.body_limit)
            .await
            .map_err(|e| GatewayError::BadRequest(format!("unreadable request body: {}", e)))?;

        let client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let headers = upstream_headers(&parts.headers, client_addr);

        self.metrics.requests.inc();
        tracing::debug!(method = %parts.method, route = %target.route, url = %target.url, "forwarding");

        let upstream = self
            .client
            .request(parts.method.clone(), &target.url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let err = GatewayError::from(e);
                match &err {
                    GatewayError::UpstreamTimeout(_) => {
                        self.metrics.upstream_timeouts.inc();
                        tracing::warn!(url = %target.url, timeout = ?self.timeout, "upstream timed out");
                    }
                    _ => {
                        self.metrics.upstream_errors.inc();
                        tracing::warn!(url = %target.url, error = %err, "upstream request failed");
                    }
                }
                err
            })?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        // Status and headers are already committed; a body failure can only
        // cut the stream short.
        let url = target.url;
        let body_errors = self.metrics.upstream_errors.clone();
        let stream = upstream.bytes_stream().inspect_err(move |e| {
            body_errors.inc();
            tracing::warn!(url = %url, error = %e, "upstream body failed");
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Request headers as sent upstream.
fn upstream_headers(incoming: &HeaderMap, client_addr: Option<SocketAddr>) -> HeaderMap {
    let mut headers = incoming.clone();
    strip_hop_by_hop(&mut headers);
    // The client sets these for the new connection.
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    if let Some(host) = incoming.get(header::HOST) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
    }
    if let Some(addr) = client_addr {
        let forwarded_for = match incoming
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{}, {}", existing, addr.ip()),
            None => addr.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
    }
    headers
}

/// Remove the standard hop-by-hop headers and any named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        headers.insert("x-request-id", HeaderValue::from_static("r-1"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-request-id").unwrap(), "r-1");
    }

    #[test]
    fn test_upstream_headers_rewrite() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        incoming.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        incoming.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        incoming.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        let addr: SocketAddr = "192.168.1.5:40000".parse().unwrap();
        let headers = upstream_headers(&incoming, Some(addr));

        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer t");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "gateway.local");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1, 192.168.1.5");
    }

    #[test]
    fn test_upstream_headers_without_client_addr() {
        let headers = upstream_headers(&HeaderMap::new(), None);
        assert!(headers.is_empty());
    }
}
