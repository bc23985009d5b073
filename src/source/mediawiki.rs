//! MediaWiki Action API source
//!
//! Enumerates main-namespace pages with `list=allpages` and fetches article
//! markup with `prop=revisions`. Enriched mode also asks for categories and
//! page info. Single fetches are one attempt each; enumeration pages go through
//! the retry executor because a failed page aborts the whole listing.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::http::ApiClient;
use super::parser::{AllPagesQuery, MediaWikiParser, PagesQuery, SiteInfoQuery};
use super::{ArticleSource, FetchMode, SourceCapabilities, SourceError, SourceResult};
use crate::ingest::{RetryExecutor, RetryPolicy};
use crate::{ArticleContent, ArticleRef, MAIN_NAMESPACE};

/// Most titles the API returns per `list=allpages` page
const ALLPAGES_PAGE_LIMIT: usize = 500;

/// General information about the wiki
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteInfo {
    /// Site name
    pub sitename: String,
    /// Main page URL
    pub base: String,
    /// Software version
    pub generator: String,
}

/// Article source backed by a MediaWiki `api.php` endpoint
#[derive(Debug)]
pub struct MediaWikiClient {
    api: ApiClient,
    article_base_url: String,
    capabilities: SourceCapabilities,
    retry: RetryExecutor,
}

impl MediaWikiClient {
    /// Create a client.
    ///
    /// `article_base_url` is the site root used to build article URLs
    /// (`{article_base_url}/wiki/{title}`).
    pub fn new(api: ApiClient, article_base_url: impl Into<String>, capabilities: SourceCapabilities) -> Self {
        Self {
            api,
            article_base_url: article_base_url.into(),
            capabilities,
            retry: RetryExecutor::new(RetryPolicy::default()),
        }
    }

    /// Retry executor used for enumeration pages
    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    /// Capabilities in effect
    pub fn capabilities(&self) -> &SourceCapabilities {
        &self.capabilities
    }

    fn fetch_params(&self, title: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("formatversion", "2".to_string()),
            ("titles", title.to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ];
        match self.capabilities.fetch_mode {
            FetchMode::Basic => params.push(("prop", "revisions".to_string())),
            FetchMode::Enriched => {
                params.push(("prop", "revisions|categories|info".to_string()));
                params.push(("cllimit", "max".to_string()));
            }
        }
        params
    }

    async fn list_page(
        &self,
        batch_limit: usize,
        apcontinue: Option<&str>,
    ) -> SourceResult<(Vec<ArticleRef>, Option<String>)> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("formatversion", "2".to_string()),
            ("list", "allpages".to_string()),
            ("apnamespace", MAIN_NAMESPACE.to_string()),
            ("aplimit", batch_limit.to_string()),
        ];
        if let Some(token) = apcontinue {
            params.push(("apcontinue", token.to_string()));
        }

        let response = self.api.get(&params).await?;
        let (query, continuation) = MediaWikiParser::into_query::<AllPagesQuery>(response)?;
        let pages = query.map(|q| q.allpages).unwrap_or_default();
        Ok((MediaWikiParser::parse_listed(pages), continuation.apcontinue))
    }

    /// Fetch site information
    pub async fn site_info(&self) -> SourceResult<SiteInfo> {
        let params = [
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("formatversion", "2".to_string()),
            ("meta", "siteinfo".to_string()),
        ];
        let response = self.api.get(&params).await?;
        let (query, _) = MediaWikiParser::into_query::<SiteInfoQuery>(response)?;
        let general = query
            .ok_or_else(|| SourceError::Parse("siteinfo response has no query".to_string()))?
            .general;
        Ok(SiteInfo {
            sitename: general.sitename,
            base: general.base,
            generator: general.generator,
        })
    }
}

#[async_trait]
impl ArticleSource for MediaWikiClient {
    async fn fetch(&self, title: &str) -> SourceResult<Option<ArticleContent>> {
        let params = self.fetch_params(title);
        let response = self.api.get(&params).await?;
        let (query, _) = MediaWikiParser::into_query::<PagesQuery>(response)?;

        let Some(page) = query.and_then(|q| q.pages.into_iter().next()) else {
            debug!(title = %title, "No page in response");
            return Ok(None);
        };

        let enriched = self.capabilities.fetch_mode == FetchMode::Enriched;
        let Some(mut article) = MediaWikiParser::parse_page(page, &self.article_base_url, enriched) else {
            debug!(title = %title, "Page missing or redirect");
            return Ok(None);
        };

        if let Some(parser) = &self.capabilities.parser {
            article.plain_text = parser.plain_text(&article.content);
            if article.plain_text.is_none() {
                warn!(title = %title, parser = parser.name(), "Content parser produced no text");
            }
        }

        Ok(Some(article))
    }

    async fn enumerate(&self, limit: Option<usize>) -> SourceResult<Vec<ArticleRef>> {
        let mut articles = Vec::new();
        let mut apcontinue: Option<String> = None;
        let mut page_number = 0u32;

        loop {
            let remaining = limit.map(|l| l.saturating_sub(articles.len()));
            if remaining == Some(0) {
                break;
            }
            let batch_limit = remaining.map_or(ALLPAGES_PAGE_LIMIT, |r| r.min(ALLPAGES_PAGE_LIMIT));
            page_number += 1;

            let label = format!("allpages page {page_number}");
            let token = apcontinue.clone();
            let (page, next) = self
                .retry
                .execute(&label, || self.list_page(batch_limit, token.as_deref()))
                .await
                .map_err(|e| SourceError::Enumeration(e.to_string()))?;

            debug!(page = page_number, items = page.len(), "Enumerated page");
            articles.extend(page);

            match next {
                Some(token) if !token.is_empty() => apcontinue = Some(token),
                _ => break,
            }
        }

        if let Some(limit) = limit {
            articles.truncate(limit);
        }
        info!(count = articles.len(), pages = page_number, "Enumeration complete");
        Ok(articles)
    }

    async fn test_connection(&self) -> bool {
        match self.site_info().await {
            Ok(site) => {
                info!(sitename = %site.sitename, generator = %site.generator, "Connected to wiki");
                true
            }
            Err(e) => {
                warn!(error = %e, endpoint = %self.api.base_url(), "Connection test failed");
                false
            }
        }
    }

    fn label(&self) -> &str {
        self.capabilities.fetch_mode.label()
    }
}
