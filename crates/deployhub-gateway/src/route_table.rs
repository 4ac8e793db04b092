//! Path-prefix route table.
//!
//! A route maps a path prefix to an upstream base URL. A request path
//! matches a prefix when it equals the prefix or continues it with `/`, so
//! `/api/deployments` matches `/api/deployments/42` but not
//! `/api/deploymentsx`. The longest matching prefix wins. The part of the
//! path after the prefix, and the query string, are appended to the upstream
//! base unchanged.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

/// One prefix → upstream mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    prefix: String,
    upstream: String,
}

impl Route {
    /// Create a route. The prefix must start with `/` and the upstream must
    /// be an absolute `http` or `https` URL.
    pub fn new(prefix: impl Into<String>, upstream: impl Into<String>) -> Result<Self, GatewayError> {
        let prefix = prefix.into();
        let upstream = upstream.into();

        if !prefix.starts_with('/') {
            return Err(GatewayError::InvalidRoute(format!(
                "prefix must start with '/': {}",
                prefix
            )));
        }
        if prefix.contains(|c: char| c == '?' || c == '#') {
            return Err(GatewayError::InvalidRoute(format!(
                "prefix must be a plain path: {}",
                prefix
            )));
        }
        let Some(rest) = upstream
            .strip_prefix("http://")
            .or_else(|| upstream.strip_prefix("https://"))
        else {
            return Err(GatewayError::InvalidRoute(format!(
                "upstream must be an http(s) URL: {}",
                upstream
            )));
        };
        if rest.is_empty() || rest.starts_with('/') || upstream.contains(|c: char| c == '?' || c == '#') {
            return Err(GatewayError::InvalidRoute(format!(
                "upstream must name a host and no query: {}",
                upstream
            )));
        }

        Ok(Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            upstream: upstream.trim_end_matches('/').to_string(),
        })
    }

    /// Path prefix, without a trailing slash. Empty for the root route.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Upstream base URL, without a trailing slash.
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// The path remainder after the prefix, if `path` falls under this route.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

/// Parses `PREFIX=UPSTREAM`.
impl FromStr for Route {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, upstream) = s.split_once('=').ok_or_else(|| {
            GatewayError::InvalidRoute(format!("expected PREFIX=UPSTREAM, got {}", s))
        })?;
        Route::new(prefix.trim(), upstream.trim())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.prefix.is_empty() { "/" } else { &self.prefix };
        write!(f, "{} -> {}", prefix, self.upstream)
    }
}

/// Resolved upstream target for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target<'a> {
    /// The route that matched.
    pub route: &'a Route,
    /// Full upstream URL including the query string.
    pub url: String,
}

/// Immutable set of routes, ordered longest prefix first.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table. Two routes with the same prefix are rejected.
    pub fn new(mut routes: Vec<Route>) -> Result<Self, GatewayError> {
        let mut seen = HashSet::new();
        for route in &routes {
            if !seen.insert(route.prefix.as_str()) {
                return Err(GatewayError::InvalidRoute(format!("duplicate prefix: {}", route)));
            }
        }
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes })
    }

    /// Routes in match order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve `path` and `query` to an upstream URL.
    pub fn resolve(&self, path: &str, query: Option<&str>) -> Option<Target<'_>> {
        self.routes.iter().find_map(|route| {
            let rest = route.strip(path)?;
            let mut url = format!("{}{}", route.upstream, rest);
            if let Some(query) = query {
                url.push('?');
                url.push_str(query);
            }
            Some(Target { route, url })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(vec![
            "/api/deployments=http://records:8081/deployments".parse().unwrap(),
            "/api=http://legacy:9000".parse().unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_exact_match() {
        let table = table();
        let target = table.resolve("/api/deployments", None).unwrap();
        assert_eq!(target.url, "http://records:8081/deployments");
    }

    #[test]
    fn test_prefix_match_keeps_remainder() {
        let table = table();
        let target = table.resolve("/api/deployments/42", None).unwrap();
        assert_eq!(target.url, "http://records:8081/deployments/42");
        assert_eq!(target.route.prefix(), "/api/deployments");
    }

    #[test]
    fn test_query_is_preserved() {
        let table = table();
        let target = table.resolve("/api/deployments", Some("status=live&limit=5")).unwrap();
        assert_eq!(target.url, "http://records:8081/deployments?status=live&limit=5");
    }

    #[test]
    fn test_longest_prefix_wins_regardless_of_order() {
        let table = RouteTable::new(vec![
            Route::new("/api", "http://legacy:9000").unwrap(),
            Route::new("/api/deployments", "http://records:8081/deployments").unwrap(),
        ])
        .unwrap();
        assert_eq!(
            table.resolve("/api/deployments/1", None).unwrap().url,
            "http://records:8081/deployments/1"
        );
        assert_eq!(table.resolve("/api/other", None).unwrap().url, "http://legacy:9000/other");
    }

    #[test]
    fn test_segment_boundary() {
        let table = table();
        // Falls through to the shorter prefix instead.
        assert_eq!(
            table.resolve("/api/deploymentsx", None).unwrap().url,
            "http://legacy:9000/deploymentsx"
        );
        assert!(table.resolve("/apix", None).is_none());
        assert!(table.resolve("/health", None).is_none());
    }

    #[test]
    fn test_root_route_matches_everything() {
        let table = RouteTable::new(vec![Route::new("/", "http://fallback:80/").unwrap()]).unwrap();
        assert_eq!(table.resolve("/", None).unwrap().url, "http://fallback:80/");
        assert_eq!(table.resolve("/a/b", None).unwrap().url, "http://fallback:80/a/b");
    }

    #[test]
    fn test_invalid_routes() {
        assert!("no-equals".parse::<Route>().is_err());
        assert!("api=http://x".parse::<Route>().is_err());
        assert!("/api=ftp://x".parse::<Route>().is_err());
        assert!("/api=http://".parse::<Route>().is_err());
        assert!("/api=http://x?y=1".parse::<Route>().is_err());
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let result = RouteTable::new(vec![
            Route::new("/api", "http://a").unwrap(),
            Route::new("/api/", "http://b").unwrap(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        let route = Route::new("/api/deployments", "http://records:8081/deployments").unwrap();
        assert_eq!(route.to_string(), "/api/deployments -> http://records:8081/deployments");
    }
}
