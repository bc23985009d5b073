//! Output document shaping
//!
//! Turns fetched [`ArticleContent`] into the JSON document written by sinks
//! and checks it carries the fields downstream consumers rely on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ArticleContent, PageMetadata};

/// Derived fields attached to every output document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    /// Markup length in characters
    pub content_length: usize,
    /// Plain-text length in characters (0 without a parser)
    pub plain_text_length: usize,
    /// Number of categories
    pub category_count: usize,
    /// When the document was produced
    pub processing_timestamp: DateTime<Utc>,
    /// Enriched page metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_metadata: Option<PageMetadata>,
}

/// One output document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedArticle {
    /// Article title
    pub title: String,
    /// Canonical URL
    pub url: String,
    /// Raw markup
    pub content: String,
    /// Plain-text rendering
    pub plain_text: Option<String>,
    /// Category names
    pub categories: Vec<String>,
    /// Always null; kept for consumers of the document schema
    pub author: Option<String>,
    /// Page identifier
    pub pageid: Option<u64>,
    /// Which source produced the document
    pub source: String,
    /// Derived fields
    pub metadata: ArticleMetadata,
}

impl ProcessedArticle {
    /// Validate required fields
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("missing title".to_string());
        }
        if self.url.trim().is_empty() {
            return Err(format!("'{}' is missing url", self.title));
        }
        if self.content.is_empty() {
            return Err(format!("'{}' is missing content", self.title));
        }
        Ok(())
    }
}

/// Builds output documents for one source
#[derive(Debug, Clone)]
pub struct ArticleProcessor {
    source: String,
}

impl ArticleProcessor {
    /// Processor stamping documents with `source`
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Shape fetched content into an output document
    pub fn process(&self, article: ArticleContent) -> ProcessedArticle {
        let metadata = ArticleMetadata {
            content_length: article.content.chars().count(),
            plain_text_length: article
                .plain_text
                .as_deref()
                .map_or(0, |text| text.chars().count()),
            category_count: article.categories.len(),
            processing_timestamp: Utc::now(),
            page_metadata: article.page_metadata,
        };

        ProcessedArticle {
            title: article.title,
            url: article.url,
            content: article.content,
            plain_text: article.plain_text,
            categories: article.categories,
            author: None,
            pageid: article.pageid,
            source: self.source.clone(),
            metadata,
        }
    }

    /// Shape and validate in one step
    pub fn process_valid(&self, article: ArticleContent) -> Result<ProcessedArticle, String> {
        let processed = self.process(article);
        processed.validate()?;
        Ok(processed)
    }
}
