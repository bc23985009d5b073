//! Article sources
//!
//! A source enumerates work items and fetches their content. Each call to
//! [`ArticleSource::fetch`] is a single attempt: retries live in
//! [`crate::ingest::RetryExecutor`], which relies on sources reporting rate
//! limiting as [`SourceError::RateLimited`] rather than as a generic failure.

use crate::config::ApiSettings;
use crate::ingest::{RateLimiter, RetryExecutor};
use crate::{ArticleContent, ArticleRef};
use async_trait::async_trait;
use std::sync::Arc;

pub mod http;
pub mod mediawiki;
pub mod parser;
pub mod retry_formatter;

pub use http::{build_http_client, ApiClient};
pub use mediawiki::{MediaWikiClient, SiteInfo};

/// Source errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The server answered 429
    #[error("rate limit exceeded")]
    RateLimited,

    /// The request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The connection could not be established
    #[error("connection failed: {0}")]
    Connection(String),

    /// Other transport-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status other than 429
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// The API returned an error document
    #[error("API error {code}: {info}")]
    Api {
        /// MediaWiki error code
        code: String,
        /// Human-readable error text
        info: String,
    },

    /// Response body could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Enumeration gave up after retries
    #[error("enumeration failed: {0}")]
    Enumeration(String),

    /// Source could not be constructed
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SourceError {
    /// Classify a transport error from reqwest.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_connect() {
            SourceError::Connection(err.to_string())
        } else {
            SourceError::Network(err.to_string())
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::RateLimited => Some(429),
            SourceError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Which page fields a source requests when fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Content and page id only
    #[default]
    Basic,
    /// Content plus categories and page metadata
    Enriched,
}

impl FetchMode {
    /// Label written into output documents
    pub fn label(&self) -> &'static str {
        match self {
            FetchMode::Basic => "basic",
            FetchMode::Enriched => "enriched",
        }
    }
}

impl std::fmt::Display for FetchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Converts raw article markup to plain text.
///
/// Markup handling is outside this crate; implementations are injected at
/// startup through [`SourceCapabilities`].
pub trait ContentParser: Send + Sync {
    /// Plain-text rendering of `markup`, or `None` when it cannot be parsed
    fn plain_text(&self, markup: &str) -> Option<String>;

    /// Parser name used in logs
    fn name(&self) -> &str;
}

/// Capability set resolved once when a source is constructed
#[derive(Clone, Default)]
pub struct SourceCapabilities {
    /// Fields to request per article
    pub fetch_mode: FetchMode,
    /// Optional markup parser
    pub parser: Option<Arc<dyn ContentParser>>,
}

impl SourceCapabilities {
    /// Capabilities for the given mode without a parser
    pub fn new(fetch_mode: FetchMode) -> Self {
        Self {
            fetch_mode,
            parser: None,
        }
    }

    /// Attach a content parser
    pub fn with_parser(mut self, parser: Arc<dyn ContentParser>) -> Self {
        self.parser = Some(parser);
        self
    }
}

impl std::fmt::Debug for SourceCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCapabilities")
            .field("fetch_mode", &self.fetch_mode)
            .field("parser", &self.parser.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

/// Source of articles to ingest
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Fetch one article.
    ///
    /// Returns `Ok(None)` when the article does not exist or is a redirect.
    async fn fetch(&self, title: &str) -> SourceResult<Option<ArticleContent>>;

    /// List articles to ingest, stopping after `limit` items when given.
    async fn enumerate(&self, limit: Option<usize>) -> SourceResult<Vec<ArticleRef>>;

    /// Check that the source is reachable
    async fn test_connection(&self) -> bool;

    /// Label written into output documents
    fn label(&self) -> &str {
        "source"
    }
}

/// Create the configured source.
///
/// The capability set is resolved here from the settings; nothing downstream
/// needs to know which mode is active.
pub fn create_source(
    settings: &ApiSettings,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
) -> SourceResult<Arc<dyn ArticleSource>> {
    create_source_with_capabilities(settings, rate_limiter, retry, settings.capabilities())
}

/// Create the configured source with an explicit capability set.
pub fn create_source_with_capabilities(
    settings: &ApiSettings,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryExecutor,
    capabilities: SourceCapabilities,
) -> SourceResult<Arc<dyn ArticleSource>> {
    let client = build_http_client(
        &settings.user_agent,
        settings.connect_timeout(),
        settings.request_timeout(),
    )?;
    let api = ApiClient::new(client, settings.base_url.clone(), rate_limiter);
    let source = MediaWikiClient::new(api, settings.article_base_url.clone(), capabilities)
        .with_retry(retry);
    Ok(Arc::new(source))
}
