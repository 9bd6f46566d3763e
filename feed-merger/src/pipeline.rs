use crate::config::{load_sources, PipelineConfig};
use crate::fetcher::Fetcher;
use crate::filter::KeywordFilter;
use crate::merger::{merge_batches, MergeStats};
use crate::normalize::Normalizer;
use crate::output::write_feed;
use crate::parser::parse_document;
use crate::rate_limiter::DomainRateLimiter;
use crate::types::{NormalizedEntry, RawEntry, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-stage counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub sources: usize,
    pub sources_failed: usize,
    /// `(source url, cause)` for every source that produced no document.
    pub failures: Vec<(String, String)>,
    pub entries_extracted: usize,
    pub entries_dropped: usize,
    pub duplicates: usize,
    pub entries_excluded: usize,
    pub entries_written: usize,
}

impl RunReport {
    pub fn log(&self) {
        info!(
            "Run {}: {} sources ({} failed), {} extracted, {} dropped, {} duplicates, {} excluded, {} written",
            self.run_id,
            self.sources,
            self.sources_failed,
            self.entries_extracted,
            self.entries_dropped,
            self.duplicates,
            self.entries_excluded,
            self.entries_written
        );
        for (url, cause) in &self.failures {
            warn!("  failed source {}: {}", url, cause);
        }
    }
}

/// Result of the synchronous merge, normalize and filter stages.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub entries: Vec<NormalizedEntry>,
    pub merge: MergeStats,
    pub excluded: usize,
}

/// Merges raw batches, normalizes the survivors and applies the keyword
/// filter. Does no I/O.
pub fn assemble(
    batches: Vec<Vec<RawEntry>>,
    normalizer: &Normalizer,
    filter: &KeywordFilter,
    now: DateTime<Utc>,
) -> Assembled {
    let merged = merge_batches(batches, now);
    let normalized = normalizer.normalize_all(merged.entries);
    let (entries, excluded) = filter.filter(normalized);

    Assembled {
        entries,
        merge: merged.stats,
        excluded,
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Fetcher,
    normalizer: Normalizer,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let rate_limiter = Arc::new(DomainRateLimiter::new(config.rate_limit.clone())?);
        let fetcher = Fetcher::new(config.fetch.clone(), rate_limiter)?;
        let normalizer = Normalizer::new(config.normalizer.clone());

        Ok(Self {
            config,
            fetcher,
            normalizer,
        })
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// One full fetch, merge, normalize, filter and write cycle.
    ///
    /// Keywords and sources are loaded before any request goes out, so a bad
    /// configuration fails without touching the network. Once configuration
    /// is valid the output is written even when every source fails.
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        info!("Starting run {}", run_id);

        let filter = match &self.config.keywords_path {
            Some(path) => KeywordFilter::from_file(path)?,
            None => KeywordFilter::default(),
        };
        let sources = load_sources(&self.config.feeds_path)?;

        let mut report = RunReport {
            run_id,
            sources: sources.len(),
            ..Default::default()
        };

        let fetches = self.fetcher.fetch_all(&sources).await;
        let mut batches = Vec::with_capacity(fetches.len());
        for fetch in fetches {
            let document = match fetch.outcome {
                Ok(document) => document,
                Err(e) => {
                    report.sources_failed += 1;
                    report.failures.push((fetch.source.url, e.to_string()));
                    continue;
                }
            };

            match parse_document(&document) {
                Ok(entries) => {
                    if entries.is_empty() {
                        warn!("No entries found in feed {}", document.url);
                    }
                    report.entries_extracted += entries.len();
                    batches.push(entries);
                }
                Err(e) => warn!("Ignoring malformed feed {}: {}", document.url, e),
            }
        }

        let assembled = assemble(batches, &self.normalizer, &filter, Utc::now());
        report.entries_dropped = assembled.merge.dropped;
        report.duplicates = assembled.merge.duplicates;
        report.entries_excluded = assembled.excluded;

        if let Err(e) = write_feed(&self.config.output_path, &assembled.entries, self.config.format) {
            error!("Failed to write {}: {}", self.config.output_path.display(), e);
            return Err(e);
        }
        report.entries_written = assembled.entries.len();

        report.log();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(title: &str, link: &str, published: &str, body: &str) -> RawEntry {
        RawEntry {
            title: Some(title.to_string()),
            link: Some(link.to_string()),
            published_text: Some(published.to_string()),
            body: Some(body.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn assemble_merges_normalizes_and_filters() {
        let now = Utc.with_ymd_and_hms(2025, 6, 20, 0, 0, 0).unwrap();
        let batches = vec![
            vec![
                raw("Shared story", "https://x.example/y", "2025-06-02T00:00:00Z", "<p>First copy</p>"),
                raw("Deal", "https://x.example/ad", "2025-06-01T00:00:00Z", "Sponsored content"),
            ],
            vec![
                raw("Shared again", "https://x.example/y", "2025-06-03T00:00:00Z", "<p>Second copy</p>"),
                raw("Later", "https://z.example/later", "2025-06-04T00:00:00Z", "<b>Bold</b> start. Then more."),
            ],
        ];

        let assembled = assemble(
            batches,
            &Normalizer::default(),
            &KeywordFilter::new(["sponsored"]),
            now,
        );

        let titles: Vec<&str> = assembled.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Shared story", "Later"]);
        assert_eq!(assembled.merge.duplicates, 1);
        assert_eq!(assembled.excluded, 1);
        assert_eq!(
            assembled.entries[1].body_html,
            "<p><b>Bold</b> start. Then more.</p>"
        );
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = PipelineConfig::new("feeds.txt", "out.xml");
        config.rate_limit.refill_per_second = -1.0;
        assert!(Pipeline::new(config).is_err());
    }
}
