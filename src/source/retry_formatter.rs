//! Retry message formatting.
//!
//! Classifies source errors for log output and builds consistent retry and
//! failure messages, so every retry path reports attempts the same way.

use super::SourceError;
use std::time::Duration;

/// Classification of retry errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Network timeout
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// Other non-success HTTP status
    ClientError(u16),
    /// The API answered with an error document
    ApiError,
    /// The response could not be decoded
    MalformedResponse,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Classify a source error
    pub fn from_error(err: &SourceError) -> Self {
        match err {
            SourceError::RateLimited => Self::RateLimit,
            SourceError::Timeout(_) => Self::NetworkTimeout,
            SourceError::Connection(_) => Self::NetworkOffline,
            SourceError::Status { status, .. } if *status >= 500 => Self::ServerError(*status),
            SourceError::Status { status, .. } => Self::ClientError(*status),
            SourceError::Api { .. } => Self::ApiError,
            SourceError::Parse(_) => Self::MalformedResponse,
            SourceError::Network(_)
            | SourceError::Enumeration(_)
            | SourceError::Configuration(_) => Self::NetworkGeneric,
        }
    }

    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::ClientError(code) => match code {
                403 => "request forbidden",
                404 => "resource not found",
                _ => "client error",
            },
            Self::ApiError => "API error",
            Self::MalformedResponse => "malformed response",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented after final failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection or raise the request timeout",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Lower requests_per_second or set a rate_limit_budget",
            Self::ServerError(_) => "The wiki may be under load, try again later",
            Self::ClientError(_) => "Check the API base URL and the User-Agent header",
            Self::ApiError => "Review the API error code in the log",
            Self::MalformedResponse => "Confirm the base URL points at a MediaWiki api.php endpoint",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// What is being retried (article title or request label)
    pub label: String,
    /// Original error message for details
    pub error_message: String,
}

impl RetryContext {
    /// Build a context from the error that triggered the retry.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error: &SourceError,
        backoff_duration: Duration,
        label: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type: RetryErrorType::from_error(error),
            backoff_duration,
            label: label.into(),
            error_message: error.to_string(),
        }
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        append_label(&mut message, &self.label);
        message
    }

    /// Format the message for a 429 backoff, which does not consume an attempt.
    pub fn format_rate_limited(&self) -> String {
        let mut message = format!(
            "Rate limited - waiting {:.1} seconds before retrying (attempt {}/{} unchanged)",
            self.backoff_duration.as_secs_f64(),
            self.attempt,
            self.max_attempts
        );
        append_label(&mut message, &self.label);
        message
    }

    /// Format retry success message when a previous attempt eventually works.
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "Retry attempt {}/{} succeeded",
            self.attempt, self.max_attempts
        );
        append_label(&mut message, &self.label);
        message
    }

    /// Format final failure summary with a suggestion.
    pub fn format_failure(&self) -> String {
        let label = if self.label.is_empty() {
            "unknown"
        } else {
            &self.label
        };
        [
            format!("[FAILED] Fetch failed after {} attempts", self.max_attempts),
            format!("  Last error: {}", self.error_message),
            format!("  Item: {label}"),
            format!("  Suggestion: {}", self.error_type.suggestion()),
        ]
        .join("\n")
    }
}

fn append_label(buffer: &mut String, label: &str) {
    if !label.is_empty() {
        buffer.push_str(" (");
        buffer.push_str(label);
        buffer.push(')');
    }
}
