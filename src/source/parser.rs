//! MediaWiki response parser
//!
//! Typed views of the `formatversion=2` JSON the Action API returns, and
//! stateless functions turning them into crate types. Legacy `formatversion=1`
//! revision bodies (`"*"`) are accepted as a fallback.

use serde::Deserialize;

use super::{SourceError, SourceResult};
use crate::{ArticleContent, ArticleRef, PageMetadata};

const CATEGORY_PREFIX: &str = "Category:";
const REDIRECT_MARKER: &str = "#redirect";

/// Top-level API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<Q> {
    /// Query payload
    pub query: Option<Q>,
    /// Continuation parameters
    #[serde(rename = "continue", default)]
    pub continuation: Option<Continuation>,
    /// Error document
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

/// `{"error": {...}}` document
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    /// Machine-readable error code
    #[serde(default)]
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub info: String,
}

/// Continuation block
#[derive(Debug, Default, Deserialize)]
pub struct Continuation {
    /// Next `apcontinue` value for `list=allpages`
    #[serde(default)]
    pub apcontinue: Option<String>,
}

/// `prop=...&titles=...` payload
#[derive(Debug, Deserialize)]
pub struct PagesQuery {
    /// Pages, one per requested title
    #[serde(default)]
    pub pages: Vec<Page>,
}

/// One page in a `prop` query
#[derive(Debug, Deserialize)]
pub struct Page {
    /// Page id; absent for missing pages
    #[serde(default)]
    pub pageid: Option<u64>,
    /// Namespace
    #[serde(default)]
    pub ns: i64,
    /// Normalized title
    #[serde(default)]
    pub title: String,
    /// Page does not exist
    #[serde(default)]
    pub missing: bool,
    /// Title is not valid
    #[serde(default)]
    pub invalid: bool,
    /// Page is a redirect (`prop=info`)
    #[serde(default)]
    pub redirect: bool,
    /// Revisions, newest first
    #[serde(default)]
    pub revisions: Vec<Revision>,
    /// Category memberships
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
    /// Last touched (`prop=info`)
    #[serde(default)]
    pub touched: Option<String>,
    /// Latest revision id (`prop=info`)
    #[serde(default)]
    pub lastrevid: Option<u64>,
    /// Length in bytes (`prop=info`)
    #[serde(default)]
    pub length: Option<u64>,
}

/// Revision with slot content
#[derive(Debug, Deserialize)]
pub struct Revision {
    /// Content slots
    #[serde(default)]
    pub slots: Option<Slots>,
    /// Legacy inline content
    #[serde(rename = "*", default)]
    pub legacy_content: Option<String>,
}

/// Revision slots
#[derive(Debug, Deserialize)]
pub struct Slots {
    /// Main slot
    pub main: Slot,
}

/// One slot's content
#[derive(Debug, Deserialize)]
pub struct Slot {
    /// Raw markup
    #[serde(default)]
    pub content: Option<String>,
    /// Legacy inline content
    #[serde(rename = "*", default)]
    pub legacy_content: Option<String>,
}

/// Category membership
#[derive(Debug, Deserialize)]
pub struct CategoryRef {
    /// Full category title
    pub title: String,
}

/// `list=allpages` payload
#[derive(Debug, Deserialize)]
pub struct AllPagesQuery {
    /// Listed pages
    #[serde(default)]
    pub allpages: Vec<ListedPage>,
}

/// One listed page
#[derive(Debug, Deserialize)]
pub struct ListedPage {
    /// Page id
    #[serde(default)]
    pub pageid: Option<u64>,
    /// Namespace
    #[serde(default)]
    pub ns: i64,
    /// Title
    pub title: String,
}

/// `meta=siteinfo` payload
#[derive(Debug, Deserialize)]
pub struct SiteInfoQuery {
    /// General site information
    pub general: GeneralInfo,
}

/// General site information
#[derive(Debug, Deserialize)]
pub struct GeneralInfo {
    /// Site name
    #[serde(default)]
    pub sitename: String,
    /// Main page URL
    #[serde(default)]
    pub base: String,
    /// MediaWiki version string
    #[serde(default)]
    pub generator: String,
}

/// Stateless parser for MediaWiki API responses
pub struct MediaWikiParser;

impl MediaWikiParser {
    /// Unwrap the query payload, surfacing API error documents.
    pub fn into_query<Q>(response: ApiResponse<Q>) -> SourceResult<(Option<Q>, Continuation)> {
        if let Some(error) = response.error {
            return Err(SourceError::Api {
                code: error.code,
                info: error.info,
            });
        }
        Ok((response.query, response.continuation.unwrap_or_default()))
    }

    /// Whether markup is a redirect page
    pub fn is_redirect(content: &str) -> bool {
        content
            .trim_start()
            .get(..REDIRECT_MARKER.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(REDIRECT_MARKER))
    }

    /// Strip the `Category:` prefix
    pub fn category_name(title: &str) -> &str {
        title.strip_prefix(CATEGORY_PREFIX).unwrap_or(title)
    }

    /// Canonical article URL
    pub fn article_url(article_base_url: &str, title: &str) -> String {
        let path_title = title.replace(' ', "_");
        format!(
            "{}/wiki/{}",
            article_base_url.trim_end_matches('/'),
            urlencoding::encode(&path_title)
        )
    }

    /// Convert a page into article content.
    ///
    /// `None` for missing, invalid, redirect or empty pages. `enriched` adds
    /// categories and page metadata.
    pub fn parse_page(page: Page, article_base_url: &str, enriched: bool) -> Option<ArticleContent> {
        if page.missing || page.invalid || page.redirect {
            return None;
        }

        let content = page.revisions.into_iter().next().and_then(|revision| {
            revision
                .slots
                .and_then(|slots| slots.main.content.or(slots.main.legacy_content))
                .or(revision.legacy_content)
        })?;

        if Self::is_redirect(&content) {
            return None;
        }

        let (categories, page_metadata) = if enriched {
            let categories = page
                .categories
                .iter()
                .map(|category| Self::category_name(&category.title).to_string())
                .collect();
            let metadata = PageMetadata {
                ns: page.ns,
                touched: page.touched,
                last_revid: page.lastrevid,
                length: page.length,
            };
            (categories, Some(metadata))
        } else {
            (Vec::new(), None)
        };

        Some(ArticleContent {
            url: Self::article_url(article_base_url, &page.title),
            title: page.title,
            content,
            plain_text: None,
            categories,
            pageid: page.pageid,
            page_metadata,
        })
    }

    /// Convert listed pages into work items
    pub fn parse_listed(pages: Vec<ListedPage>) -> Vec<ArticleRef> {
        pages
            .into_iter()
            .filter(|page| !page.title.is_empty())
            .map(|page| ArticleRef {
                title: page.title,
                pageid: page.pageid,
                ns: page.ns,
            })
            .collect()
    }
}
