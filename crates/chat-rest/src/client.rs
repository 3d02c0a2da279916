//! REST dispatcher
//!
//! Every call goes through the same path: wait for admission, encode, send
//! with a timeout, feed the response's rate-limit headers back, then either
//! decode the success body or surface the API error.

use crate::body::RequestBody;
use crate::endpoint::Endpoint;
use crate::error::{ApiError, RestResult};
use crate::headers::parse_rate_limit_headers;
use chat_common::ClientConfig;
use chat_ratelimit::RateLimitCoordinator;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// REST client settings
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub token: String,
    /// Upper bound on a single request, connect to last byte
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api/v10".to_string(),
            token: String::new(),
            timeout: Duration::from_secs(5),
            user_agent: format!("chat-client ({})", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&ClientConfig> for RestConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            base_url: config.rest.base_url.clone(),
            token: config.app.token.clone(),
            timeout: Duration::from_millis(config.rest.timeout_ms),
            user_agent: format!("{} ({})", config.app.name, env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Rate-limit-aware dispatcher for the REST API
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: RestConfig,
    limiter: Option<Arc<RateLimitCoordinator>>,
}

impl RestClient {
    pub fn new(config: RestConfig) -> RestResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            config,
            limiter: None,
        })
    }

    /// Gate every request through `limiter`
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimitCoordinator>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimitCoordinator>> {
        self.limiter.as_ref()
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Send one request and decode the success body into `T`.
    ///
    /// An empty success body decodes as JSON `null`, so `()` and
    /// `Option<_>` work for endpoints that return nothing. Non-2xx
    /// responses are never retried here.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        body: RequestBody,
    ) -> RestResult<T> {
        if let Some(limiter) = &self.limiter {
            limiter.execute_call(&endpoint.route).await?;
        }

        let url = endpoint.url(&self.config.base_url);
        let builder = self
            .http
            .request(endpoint.method.clone(), &url)
            .header(AUTHORIZATION, format!("Bot {}", self.config.token));
        let builder = body.apply(builder)?;

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status();

        let rate_limit = parse_rate_limit_headers(response.headers());
        if let Some(limiter) = &self.limiter {
            limiter.update(&endpoint.route, &rate_limit).await?;
        }

        let bytes = response.bytes().await?;
        tracing::debug!(
            method = %endpoint.method,
            path = %endpoint.path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "REST request completed"
        );

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).into_owned();
            if status.as_u16() == 429 {
                tracing::warn!(
                    route = %endpoint.route,
                    bucket = ?rate_limit.bucket,
                    global = rate_limit.global,
                    "Request rejected with 429"
                );
            }
            return Err(ApiError::new(status.as_u16(), body).into());
        }

        let payload: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &bytes
        };
        Ok(serde_json::from_slice(payload)?)
    }
}
