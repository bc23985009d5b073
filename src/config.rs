//! Pipeline configuration
//!
//! Loaded from a TOML file where every section and field is optional:
//!
//! ```toml
//! [api]
//! base_url = "https://en.wikipedia.org/w/api.php"
//! article_base_url = "https://en.wikipedia.org"
//! user_agent = "my-export/1.0 (ops@example.org)"
//! enriched = true
//!
//! [rate_limit]
//! requests_per_second = 2.0
//! burst_limit = 5
//!
//! [processing]
//! batch_size = 1000
//! chunk_size = 100
//! max_workers = 4
//! persistence = "journal"
//!
//! [state]
//! dir = "state"
//!
//! [sink]
//! output_dir = "output"
//! ```
//!
//! `WIKI_INGEST_USER_AGENT` overrides the user agent after loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::ingest::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_COMPACT_EVERY, DEFAULT_INITIAL_DELAY_MS,
    DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES, DEFAULT_MAX_WORKERS, MAX_WORKERS_LIMIT,
};
use crate::ingest::rate_limit::RateLimitConfig;
use crate::ingest::RetryPolicy;
use crate::resume::{PersistenceMode, QueueOptions};
use crate::sink::ArtifactNaming;
use crate::source::{FetchMode, SourceCapabilities};

/// Environment variable overriding `api.user_agent`
pub const USER_AGENT_ENV: &str = "WIKI_INGEST_USER_AGENT";

const QUEUE_FILE: &str = "queue.json";
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {path}: {message}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// The file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// `[api]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// `api.php` endpoint
    pub base_url: String,
    /// Site root used to build article URLs
    pub article_base_url: String,
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Request categories and page info with each article
    pub enriched: bool,
    /// TCP connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://en.wikipedia.org/w/api.php".to_string(),
            article_base_url: "https://en.wikipedia.org".to_string(),
            user_agent: concat!("wiki-ingest/", env!("CARGO_PKG_VERSION")).to_string(),
            enriched: false,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

impl ApiSettings {
    /// Capability set for the source
    pub fn capabilities(&self) -> SourceCapabilities {
        let mode = if self.enriched {
            FetchMode::Enriched
        } else {
            FetchMode::Basic
        };
        SourceCapabilities::new(mode)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `[retry]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay
    pub initial_delay_ms: u64,
    /// Backoff cap
    pub max_delay_ms: u64,
    /// Cap on rate-limit backoff per item; unset waits indefinitely
    pub rate_limit_budget_secs: Option<u64>,
    /// Randomize delays by up to 25%
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            rate_limit_budget_secs: None,
            jitter: false,
        }
    }
}

impl RetrySettings {
    /// Policy for the retry executor
    pub fn policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_delays(
                Duration::from_millis(self.initial_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            )
            .with_rate_limit_budget(self.rate_limit_budget_secs.map(Duration::from_secs));
        policy.jitter = self.jitter;
        policy
    }
}

/// `[processing]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    /// Articles per uploaded batch
    pub batch_size: usize,
    /// Articles per dispatcher chunk
    pub chunk_size: usize,
    /// Concurrent workers; 1 runs sequentially
    pub max_workers: usize,
    /// Queue persistence strategy
    pub persistence: PersistenceMode,
    /// Journal entries between compactions
    pub compact_every: usize,
    /// Persist the queue at all; off keeps it in memory only
    pub queue_persistence: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            persistence: PersistenceMode::Snapshot,
            compact_every: DEFAULT_COMPACT_EVERY,
            queue_persistence: true,
        }
    }
}

/// `[state]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// Directory holding the queue, checkpoint and lock files
    pub dir: PathBuf,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("state"),
        }
    }
}

/// `[sink]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Output root
    pub output_dir: PathBuf,
    /// Artifact naming
    #[serde(flatten)]
    pub naming: ArtifactNaming,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            naming: ArtifactNaming::default(),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Source API
    pub api: ApiSettings,
    /// Request rate
    pub rate_limit: RateLimitConfig,
    /// Retry behavior
    pub retry: RetrySettings,
    /// Batching and concurrency
    pub processing: ProcessingSettings,
    /// Resume state location
    pub state: StateSettings,
    /// Output location
    pub sink: SinkSettings,
}

impl PipelineConfig {
    /// Load from a TOML file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load `path` when given, otherwise defaults; environment overrides apply either way
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(user_agent) = std::env::var(USER_AGENT_ENV) {
            if !user_agent.trim().is_empty() {
                self.api.user_agent = user_agent;
            }
        }
    }

    /// Check every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate().map_err(ConfigError::Invalid)?;
        self.sink.naming.validate().map_err(ConfigError::Invalid)?;

        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url must not be empty".to_string()));
        }
        if self.api.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("api.user_agent must not be empty".to_string()));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_delay_ms ({}) must be at least initial_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.initial_delay_ms
            )));
        }

        let processing = &self.processing;
        if processing.batch_size == 0 {
            return Err(ConfigError::Invalid("processing.batch_size must be at least 1".to_string()));
        }
        if processing.chunk_size == 0 {
            return Err(ConfigError::Invalid("processing.chunk_size must be at least 1".to_string()));
        }
        if processing.max_workers == 0 || processing.max_workers > MAX_WORKERS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "processing.max_workers must be between 1 and {MAX_WORKERS_LIMIT}, got {}",
                processing.max_workers
            )));
        }
        if processing.compact_every == 0 {
            return Err(ConfigError::Invalid("processing.compact_every must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Queue document location
    pub fn queue_path(&self) -> PathBuf {
        self.state.dir.join(QUEUE_FILE)
    }

    /// Checkpoint document location
    pub fn checkpoint_path(&self) -> PathBuf {
        self.state.dir.join(CHECKPOINT_FILE)
    }

    /// Queue persistence options
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            mode: self.processing.persistence,
            compact_every: self.processing.compact_every.max(1),
        }
    }
}
