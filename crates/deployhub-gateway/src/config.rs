//! Gateway configuration.

use std::time::Duration;

use clap::Parser;

use crate::error::GatewayError;
use crate::route_table::{Route, RouteTable};

/// Default upstream timeout.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum request body size forwarded upstream.
pub const DEFAULT_BODY_LIMIT: usize = 4 * 1024 * 1024;

/// DeployHub gateway command line arguments.
#[derive(Debug, Parser)]
#[command(name = "deployhub-gateway")]
#[command(about = "Path-prefix reverse proxy for DeployHub")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, env = "GATEWAY_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Route as PREFIX=UPSTREAM, e.g. /api/deployments=http://127.0.0.1:8081/deployments.
    /// Repeatable. When none is given, the deployments route is derived from
    /// --deployments-url.
    #[arg(short, long = "route", env = "GATEWAY_ROUTES", value_delimiter = ',')]
    pub routes: Vec<String>,

    /// Base URL of the record store, used for the default route.
    #[arg(long, env = "DEPLOYMENTS_SERVICE_URL", default_value = "http://127.0.0.1:8081")]
    pub deployments_url: String,

    /// Upstream timeout (ms) covering connect and response.
    #[arg(long, default_value_t = DEFAULT_UPSTREAM_TIMEOUT.as_millis() as u64)]
    pub upstream_timeout_ms: u64,

    /// Maximum request body size in bytes.
    #[arg(long, default_value_t = DEFAULT_BODY_LIMIT)]
    pub body_limit: usize,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    /// Routes, in any order.
    pub routes: Vec<Route>,
    /// Upstream timeout.
    pub upstream_timeout: Duration,
    /// Maximum request body size.
    pub body_limit: usize,
}

impl GatewayConfig {
    /// Build from command line arguments, validating every route.
    pub fn from_args(args: &Args) -> Result<Self, GatewayError> {
        let routes = if args.routes.is_empty() {
            vec![default_route(&args.deployments_url)?]
        } else {
            args.routes
                .iter()
                .filter(|r| !r.trim().is_empty())
                .map(|r| r.parse())
                .collect::<Result<Vec<Route>, _>>()?
        };

        Ok(Self {
            listen_addr: args.listen.clone(),
            routes,
            upstream_timeout: Duration::from_millis(args.upstream_timeout_ms),
            body_limit: args.body_limit,
        })
    }

    /// Set the listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Replace the routes.
    pub fn with_routes(mut self, routes: Vec<Route>) -> Self {
        self.routes = routes;
        self
    }

    /// Set the upstream timeout.
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Set the request body limit.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Build the route table.
    pub fn route_table(&self) -> Result<RouteTable, GatewayError> {
        RouteTable::new(self.routes.clone())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            routes: Vec::new(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// `/api/deployments` → `<base>/deployments`.
fn default_route(deployments_url: &str) -> Result<Route, GatewayError> {
    Route::new(
        "/api/deployments",
        format!("{}/deployments", deployments_url.trim_end_matches('/')),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_route_from_deployments_url() {
        let args = Args::parse_from(["deployhub-gateway", "--deployments-url", "http://records:8081/"]);
        let config = GatewayConfig::from_args(&args).unwrap();

        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].prefix(), "/api/deployments");
        assert_eq!(config.routes[0].upstream(), "http://records:8081/deployments");
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert_eq!(config.body_limit, 4 * 1024 * 1024);
    }

    #[test]
    fn test_explicit_routes_replace_default() {
        let args = Args::parse_from([
            "deployhub-gateway",
            "--route",
            "/api/deployments=http://a:1/deployments",
            "--route",
            "/api/events=http://b:2",
        ]);
        let config = GatewayConfig::from_args(&args).unwrap();
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.route_table().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_route_is_rejected() {
        let args = Args::parse_from(["deployhub-gateway", "--route", "api=http://a"]);
        assert!(GatewayConfig::from_args(&args).is_err());
    }
}
