//! HTTP plumbing for the MediaWiki API
//!
//! One shared `reqwest` client and one shared rate limiter per process. Every
//! request waits on the limiter, is timed by [`HttpRequestMetrics`], and
//! reports its status back to the limiter so adaptive throttling sees 429s.
//! Transport failures are not reported as responses.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{SourceError, SourceResult};
use crate::ingest::RateLimiter;
use crate::metrics::HttpRequestMetrics;

/// Longest response body excerpt kept in error messages
const ERROR_EXCERPT_CHARS: usize = 200;

/// Build the shared HTTP client
///
/// MediaWiki operators ask for a descriptive User-Agent, so one is always set.
pub fn build_http_client(
    user_agent: &str,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> SourceResult<Arc<Client>> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .map(Arc::new)
        .map_err(|e| SourceError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// Rate-limited JSON client for a single API endpoint
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Arc<Client>,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl ApiClient {
    /// Create a client for `base_url` (the `api.php` endpoint)
    pub fn new(client: Arc<Client>, base_url: impl Into<String>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            rate_limiter,
        }
    }

    /// Endpoint URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared rate limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Issue one GET with `params` and decode the JSON body.
    ///
    /// A single attempt: retrying is the caller's decision.
    pub async fn get<T>(&self, params: &[(&str, String)]) -> SourceResult<T>
    where
        T: DeserializeOwned,
    {
        self.rate_limiter.acquire().await;

        let action = params
            .iter()
            .find(|(key, _)| *key == "list" || *key == "meta" || *key == "prop")
            .map(|(key, value)| format!("{key}={value}"))
            .unwrap_or_else(|| "query".to_string());
        let request_metrics = HttpRequestMetrics::start(action);

        let response = match self.client.get(&self.base_url).query(params).send().await {
            Ok(response) => response,
            Err(e) => {
                request_metrics.record_network_error();
                return Err(SourceError::from_transport(&e));
            }
        };

        let status = response.status();
        self.rate_limiter.record_request(status.as_u16());
        request_metrics.record_complete(status.as_u16());

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(ERROR_EXCERPT_CHARS).collect();
            return Err(SourceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::from_transport(&e))?;

        debug!(
            correlation_id = %request_metrics.correlation_id(),
            bytes = bytes.len(),
            "Decoding API response"
        );

        serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::Parse(format!("Failed to deserialize response: {e}")))
    }
}
