use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// One configured remote feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub domain: String,
}

impl Source {
    /// Accepts only absolute http/https URLs that carry a host.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(MergerError::Config(format!(
                "unsupported scheme '{}' in source {}",
                url.scheme(),
                raw
            )));
        }
        let domain = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| MergerError::Config(format!("source {} has no host", raw)))?
            .to_lowercase();

        Ok(Self {
            url: raw.trim().to_string(),
            domain,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclosureRef {
    pub url: String,
    pub mime_type: Option<String>,
}

impl EnclosureRef {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|mime| mime.starts_with("image/"))
            .unwrap_or(false)
    }
}

/// An item exactly as extracted from one feed document. Upstream feeds are
/// inconsistent, so nothing here is guaranteed to be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub title: Option<String>,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub link: Option<String>,
    pub published_text: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_text: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub enclosures: Vec<EnclosureRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntry {
    pub identity: String,
    pub title: String,
    pub link: Option<String>,
    pub published_at: DateTime<Utc>,
    pub raw_body: String,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub enclosures: Vec<EnclosureRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntry {
    pub identity: String,
    pub title: String,
    pub subheading: Option<String>,
    pub link: Option<String>,
    pub published_at: DateTime<Utc>,
    pub body_html: String,
    pub body_summary: String,
    pub images: Vec<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
}

/// Body of a successful fetch, handed to the entry extractor.
#[derive(Debug, Clone)]
pub struct FeedDocument {
    pub url: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub http_status: u16,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    pub concurrency: usize,
}

impl FetchConfig {
    pub fn max_feed_bytes(&self) -> usize {
        self.max_feed_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "feed-merger/0.1 (+https://github.com/feed-merger/feed-merger)".to_string(),
            timeout_seconds: 30,
            max_retries: 5,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            max_feed_size_mb: 10,
            max_redirects: 5,
            concurrency: 1,
        }
    }
}

/// Longest accepted spacing between two requests to one domain.
pub const MAX_DOMAIN_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Slowest accepted global refill: one token per day.
pub const MIN_REFILL_PER_SECOND: f64 = 1.0 / (24.0 * 60.0 * 60.0);

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Global token bucket size.
    pub capacity: u32,
    /// Global refill rate, tokens per second.
    pub refill_per_second: f64,
    /// Minimum spacing between two requests to the same domain.
    pub domain_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 2.0,
            domain_delay: Duration::from_secs(10),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(MergerError::Config(
                "rate limiter capacity must be at least 1".to_string(),
            ));
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second < MIN_REFILL_PER_SECOND {
            return Err(MergerError::Config(format!(
                "rate limiter refill rate must be at least one token per day, got {}",
                self.refill_per_second
            )));
        }
        if self.domain_delay > MAX_DOMAIN_DELAY {
            return Err(MergerError::Config(format!(
                "domain delay must be at most {}s, got {}s",
                MAX_DOMAIN_DELAY.as_secs(),
                self.domain_delay.as_secs()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Still rate limited after {attempts} attempts: {url}")]
    RetriesExhausted { url: String, attempts: u32 },

    #[error("Feed {url} exceeds the {limit_mb}MB size limit")]
    FeedTooLarge { url: String, limit_mb: usize },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Output error: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, MergerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_derives_lowercase_domain() {
        let source = Source::parse("  https://Feeds.Example.COM/rss.xml ").unwrap();
        assert_eq!(source.domain, "feeds.example.com");
        assert_eq!(source.url, "https://Feeds.Example.COM/rss.xml");
    }

    #[test]
    fn source_rejects_other_schemes() {
        assert!(matches!(
            Source::parse("ftp://example.com/feed"),
            Err(MergerError::Config(_))
        ));
        assert!(matches!(
            Source::parse("not a url"),
            Err(MergerError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rate_limit_config_rejects_zero_refill() {
        let config = RateLimitConfig {
            refill_per_second: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(RateLimitConfig::default().validate().is_ok());
    }
}
