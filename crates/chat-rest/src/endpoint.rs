//! Request targets

use chat_ratelimit::RateLimitRoute;
use reqwest::Method;

/// One API call target: method, path below the base URL, and the route
/// family it is accounted under.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub method: Method,
    /// Path relative to the base URL, e.g. `/channels/1/messages`
    pub path: String,
    pub route: RateLimitRoute,
}

impl Endpoint {
    pub fn new(method: Method, path: impl Into<String>, route: RateLimitRoute) -> Self {
        Self {
            method,
            path: path.into(),
            route,
        }
    }

    pub fn get(path: impl Into<String>, route: RateLimitRoute) -> Self {
        Self::new(Method::GET, path, route)
    }

    pub fn post(path: impl Into<String>, route: RateLimitRoute) -> Self {
        Self::new(Method::POST, path, route)
    }

    pub fn put(path: impl Into<String>, route: RateLimitRoute) -> Self {
        Self::new(Method::PUT, path, route)
    }

    pub fn patch(path: impl Into<String>, route: RateLimitRoute) -> Self {
        Self::new(Method::PATCH, path, route)
    }

    pub fn delete(path: impl Into<String>, route: RateLimitRoute) -> Self {
        Self::new(Method::DELETE, path, route)
    }

    /// Full URL below `base_url`, tolerating a slash on either side
    pub fn url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}
