//! Shared fakes for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiki_ingest::processor::ProcessedArticle;
use wiki_ingest::sink::{ArtifactSink, SinkError, SinkResult};
use wiki_ingest::source::{ArticleSource, SourceError, SourceResult};
use wiki_ingest::{ArticleContent, ArticleRef};

/// Build work items from titles
pub fn refs(titles: &[&str]) -> Vec<ArticleRef> {
    titles.iter().map(|t| ArticleRef::new(*t)).collect()
}

/// `count` titles named `Article 0000`, `Article 0001`, ...
pub fn numbered(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("Article {i:04}")).collect()
}

/// Article content for `title`
pub fn content(title: &str) -> ArticleContent {
    ArticleContent {
        title: title.to_string(),
        url: format!("https://wiki.example.org/wiki/{}", title.replace(' ', "_")),
        content: format!("'''{title}''' is an article."),
        plain_text: None,
        categories: Vec::new(),
        pageid: None,
        page_metadata: None,
    }
}

/// In-memory source with scripted behavior per title
#[derive(Default)]
pub struct FakeSource {
    titles: Vec<String>,
    missing: HashSet<String>,
    broken: HashSet<String>,
    empty: HashSet<String>,
    rate_limited_once: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    reachable: bool,
    fetches: Mutex<HashMap<String, usize>>,
    total_fetches: AtomicUsize,
}

impl FakeSource {
    /// Source listing `titles`, all fetchable
    pub fn new<S: AsRef<str>>(titles: &[S]) -> Self {
        Self {
            titles: titles.iter().map(|t| t.as_ref().to_string()).collect(),
            reachable: true,
            ..Self::default()
        }
    }

    /// Titles that do not exist
    pub fn with_missing(mut self, titles: &[&str]) -> Self {
        self.missing.extend(titles.iter().map(|t| t.to_string()));
        self
    }

    /// Titles that always fail with HTTP 500
    pub fn with_broken(mut self, titles: &[&str]) -> Self {
        self.broken.extend(titles.iter().map(|t| t.to_string()));
        self
    }

    /// Titles whose content is empty
    pub fn with_empty(mut self, titles: &[&str]) -> Self {
        self.empty.extend(titles.iter().map(|t| t.to_string()));
        self
    }

    /// Titles answered with one 429 before succeeding
    pub fn with_rate_limited_once(self, titles: &[&str]) -> Self {
        self.rate_limited_once
            .lock()
            .unwrap()
            .extend(titles.iter().map(|t| t.to_string()));
        self
    }

    /// Delay every fetch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the connection test
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Fetch attempts for `title`
    pub fn fetch_count(&self, title: &str) -> usize {
        self.fetches.lock().unwrap().get(title).copied().unwrap_or(0)
    }

    /// All fetch attempts
    pub fn total_fetches(&self) -> usize {
        self.total_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArticleSource for FakeSource {
    async fn fetch(&self, title: &str) -> SourceResult<Option<ArticleContent>> {
        *self.fetches.lock().unwrap().entry(title.to_string()).or_insert(0) += 1;
        self.total_fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.rate_limited_once.lock().unwrap().remove(title) {
            return Err(SourceError::RateLimited);
        }
        if self.broken.contains(title) {
            return Err(SourceError::Status {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        if self.missing.contains(title) {
            return Ok(None);
        }
        let mut article = content(title);
        if self.empty.contains(title) {
            article.content.clear();
        }
        Ok(Some(article))
    }

    async fn enumerate(&self, limit: Option<usize>) -> SourceResult<Vec<ArticleRef>> {
        let take = limit.unwrap_or(self.titles.len());
        Ok(self.titles.iter().take(take).map(ArticleRef::new).collect())
    }

    async fn test_connection(&self) -> bool {
        self.reachable
    }

    fn label(&self) -> &str {
        "fake"
    }
}

/// One recorded upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub batch_number: u64,
    pub start_index: u64,
    pub titles: Vec<String>,
}

/// Sink keeping uploads in memory
#[derive(Default)]
pub struct MemorySink {
    uploads: Mutex<Vec<Upload>>,
    fail_batches: HashSet<u64>,
    short_batches: HashSet<u64>,
    writable: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            writable: true,
            ..Self::default()
        }
    }

    /// Reject the given batch numbers with an error
    pub fn failing_batches(mut self, batches: &[u64]) -> Self {
        self.fail_batches.extend(batches);
        self
    }

    /// Store all but one item of the given batch numbers
    pub fn short_batches(mut self, batches: &[u64]) -> Self {
        self.short_batches.extend(batches);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    /// Every stored title, in upload order
    pub fn stored_titles(&self) -> Vec<String> {
        self.uploads()
            .into_iter()
            .flat_map(|upload| upload.titles)
            .collect()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn upload_batch(
        &self,
        items: &[ProcessedArticle],
        batch_number: u64,
        start_index: u64,
    ) -> SinkResult<usize> {
        if self.fail_batches.contains(&batch_number) {
            return Err(SinkError::UploadFailed(format!("batch {batch_number} rejected")));
        }
        let stored = if self.short_batches.contains(&batch_number) {
            items.len().saturating_sub(1)
        } else {
            items.len()
        };
        self.uploads.lock().unwrap().push(Upload {
            batch_number,
            start_index,
            titles: items.iter().take(stored).map(|a| a.title.clone()).collect(),
        });
        Ok(stored)
    }

    async fn test_connection(&self) -> bool {
        self.writable
    }
}
