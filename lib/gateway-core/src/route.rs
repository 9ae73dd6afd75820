//! Prefix routing table and path rewriting

use crate::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

fn default_preserve_host() -> bool {
    true
}

/// Binding of a route prefix to a logical service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Path prefix, e.g. `/auth`
    pub prefix: String,
    /// Logical service name resolved per request, e.g. `auth-service`
    pub service: String,
    /// Forward the caller's Host header instead of the backend authority
    #[serde(default = "default_preserve_host")]
    pub preserve_host: bool,
}

impl Route {
    pub fn new(prefix: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            service: service.into(),
            preserve_host: true,
        }
    }

    /// Whether `path` falls under this route's prefix
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Strip the prefix from `path_and_query`, keeping the query string verbatim.
    ///
    /// `/auth/login?next=1` becomes `/login?next=1`; `/auth` becomes `/`.
    pub fn rewrite(&self, path_and_query: &str) -> String {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let rest = path.strip_prefix(self.prefix.as_str()).unwrap_or(path);
        let mut rewritten = if rest.is_empty() {
            "/".to_string()
        } else {
            rest.to_string()
        };

        if let Some(query) = query {
            rewritten.push('?');
            rewritten.push_str(query);
        }
        rewritten
    }

    fn validate(&self) -> Result<()> {
        if !self.prefix.starts_with('/') {
            return Err(GatewayError::InvalidConfiguration(format!(
                "route prefix '{}' must start with '/'",
                self.prefix
            )));
        }
        if self.prefix.len() > 1 && self.prefix.ends_with('/') {
            return Err(GatewayError::InvalidConfiguration(format!(
                "route prefix '{}' must not end with '/'",
                self.prefix
            )));
        }
        if self.service.trim().is_empty() {
            return Err(GatewayError::InvalidConfiguration(format!(
                "route '{}' has an empty service name",
                self.prefix
            )));
        }
        Ok(())
    }
}

/// A matched route together with the path the backend should see
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub rewritten: String,
}

/// Routing table mapping prefixes to logical services
#[derive(Clone, Debug)]
pub struct RouteTable {
    // Sorted longest prefix first
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a validated routing table
    pub fn new(routes: Vec<Route>) -> Result<Self> {
        let mut seen = HashSet::new();
        for route in &routes {
            route.validate()?;
            if !seen.insert(route.prefix.as_str()) {
                return Err(GatewayError::InvalidConfiguration(format!(
                    "duplicate route prefix '{}'",
                    route.prefix
                )));
            }
        }

        let mut routes = routes;
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes })
    }

    /// Find the longest prefix matching the request's path.
    ///
    /// `path_and_query` is the request target, e.g. `/auth/login?x=1`.
    pub fn match_request(&self, path_and_query: &str) -> Option<RouteMatch<'_>> {
        let path = path_and_query
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(path_and_query);

        let route = self.routes.iter().find(|route| {
            // The root prefix matches every path
            route.prefix == "/" || route.matches(path)
        })?;

        let rewritten = if route.prefix == "/" {
            path_and_query.to_string()
        } else {
            route.rewrite(path_and_query)
        };

        debug!(
            "Matched {} to route {} -> {} ({})",
            path, route.prefix, route.service, rewritten
        );

        Some(RouteMatch { route, rewritten })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(vec![
            Route::new("/auth", "auth-service"),
            Route::new("/api/vehicles", "vehicles-service"),
            Route::new("/api", "catalog-service"),
        ])
        .expect("valid table")
    }

    #[test]
    fn test_prefix_stripped() {
        let table = table();
        let matched = table.match_request("/auth/login").unwrap();
        assert_eq!(matched.route.service, "auth-service");
        assert_eq!(matched.rewritten, "/login");
    }

    #[test]
    fn test_query_string_preserved() {
        let table = table();
        let matched = table.match_request("/auth/profile?fields=name,email&x=%20").unwrap();
        assert_eq!(matched.rewritten, "/profile?fields=name,email&x=%20");
    }

    #[test]
    fn test_bare_prefix_becomes_root() {
        let table = table();
        assert_eq!(table.match_request("/auth").unwrap().rewritten, "/");
        assert_eq!(table.match_request("/auth/").unwrap().rewritten, "/");
        assert_eq!(table.match_request("/auth?x=1").unwrap().rewritten, "/?x=1");
    }

    #[test]
    fn test_segment_boundary() {
        let table = table();
        assert!(table.match_request("/authx/login").is_none());
        assert!(table.match_request("/").is_none());
        assert!(table.match_request("/payments/1").is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = table();
        let matched = table.match_request("/api/vehicles/42").unwrap();
        assert_eq!(matched.route.service, "vehicles-service");
        assert_eq!(matched.rewritten, "/42");

        let matched = table.match_request("/api/branches").unwrap();
        assert_eq!(matched.route.service, "catalog-service");
        assert_eq!(matched.rewritten, "/branches");
    }

    #[test]
    fn test_root_prefix_passes_path_through() {
        let table = RouteTable::new(vec![Route::new("/", "web")]).unwrap();
        let matched = table.match_request("/index.html?v=2").unwrap();
        assert_eq!(matched.rewritten, "/index.html?v=2");
    }

    #[test]
    fn test_invalid_routes_rejected() {
        assert!(RouteTable::new(vec![Route::new("auth", "auth-service")]).is_err());
        assert!(RouteTable::new(vec![Route::new("/auth/", "auth-service")]).is_err());
        assert!(RouteTable::new(vec![Route::new("/auth", " ")]).is_err());
        assert!(RouteTable::new(vec![
            Route::new("/auth", "auth-service"),
            Route::new("/auth", "other-service"),
        ])
        .is_err());
    }
}
