use crate::normalize::NormalizerConfig;
use crate::output::OutputFormat;
use crate::types::{FetchConfig, MergerError, RateLimitConfig, Result, Source};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Reads a one-item-per-line list, skipping blank lines and `#` comments.
pub fn read_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => MergerError::Config(format!("{} does not exist", path.display())),
        _ => MergerError::Config(format!("cannot read {}: {}", path.display(), e)),
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Loads the source list. Invalid URLs are skipped with a warning; a list
/// without a single valid source is an error.
pub fn load_sources(path: &Path) -> Result<Vec<Source>> {
    let mut sources = Vec::new();
    for line in read_list(path)? {
        match Source::parse(&line) {
            Ok(source) => sources.push(source),
            Err(e) => warn!("Skipping invalid feed URL {}: {}", line, e),
        }
    }

    if sources.is_empty() {
        return Err(MergerError::Config(format!(
            "no valid feed URLs in {}",
            path.display()
        )));
    }
    info!("Loaded {} sources from {}", sources.len(), path.display());
    Ok(sources)
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub feeds_path: PathBuf,
    /// No keyword file means nothing is excluded.
    pub keywords_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub format: OutputFormat,
    pub fetch: FetchConfig,
    pub rate_limit: RateLimitConfig,
    pub normalizer: NormalizerConfig,
}

impl PipelineConfig {
    pub fn new(feeds_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            feeds_path: feeds_path.into(),
            keywords_path: None,
            output_path: output_path.into(),
            format: OutputFormat::default(),
            fetch: FetchConfig::default(),
            rate_limit: RateLimitConfig::default(),
            normalizer: NormalizerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;

        if self.fetch.timeout_seconds == 0 {
            return Err(MergerError::Config(
                "request timeout must be at least one second".to_string(),
            ));
        }
        if self.fetch.max_feed_size_mb == 0 {
            return Err(MergerError::Config("feed size limit must be at least 1MB".to_string()));
        }
        if self.fetch.concurrency == 0 {
            return Err(MergerError::Config("concurrency must be at least 1".to_string()));
        }
        if self.fetch.user_agent.trim().is_empty() {
            return Err(MergerError::Config("user agent must not be empty".to_string()));
        }
        if self.normalizer.sentences_per_paragraph == 0 {
            return Err(MergerError::Config(
                "sentences per paragraph must be at least 1".to_string(),
            ));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(MergerError::Config("output path must not be empty".to_string()));
        }
        Ok(())
    }
}
