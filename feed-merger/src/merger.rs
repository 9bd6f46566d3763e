use crate::types::{CanonicalEntry, RawEntry};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use std::collections::HashSet;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_TITLE: &str = "No Title";

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%a, %d %b %Y %H:%M:%S",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub input: usize,
    pub dropped: usize,
    pub duplicates: usize,
    pub output: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutput {
    pub entries: Vec<CanonicalEntry>,
    pub stats: MergeStats,
}

/// Collects raw entries across sources and produces one time-ordered,
/// deduplicated sequence. The first entry seen for an identity wins.
pub struct Merger {
    now: DateTime<Utc>,
    seen: HashSet<String>,
    entries: Vec<CanonicalEntry>,
    stats: MergeStats,
}

impl Merger {
    /// `now` is the fallback timestamp for entries without a usable date.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            seen: HashSet::new(),
            entries: Vec::new(),
            stats: MergeStats::default(),
        }
    }

    pub fn add_batch<I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = RawEntry>,
    {
        for raw in batch {
            self.add(raw);
        }
    }

    pub fn add(&mut self, raw: RawEntry) {
        self.stats.input += 1;

        let Some(entry) = canonicalize(raw, self.now) else {
            self.stats.dropped += 1;
            return;
        };

        if !self.seen.insert(entry.identity.clone()) {
            debug!("Skipping duplicate entry: {}", entry.identity);
            self.stats.duplicates += 1;
            return;
        }

        self.entries.push(entry);
    }

    pub fn finish(self) -> MergeOutput {
        let mut entries = self.entries;
        // `sort_by_key` is stable, so equal timestamps keep source order.
        entries.sort_by_key(|entry| entry.published_at);

        let stats = MergeStats {
            output: entries.len(),
            ..self.stats
        };
        if stats.dropped > 0 {
            info!("Dropped {} entries without a usable link or title", stats.dropped);
        }
        if stats.duplicates > 0 {
            info!("Removed {} duplicate entries", stats.duplicates);
        }

        MergeOutput { entries, stats }
    }
}

pub fn merge_batches<I, B>(batches: I, now: DateTime<Utc>) -> MergeOutput
where
    I: IntoIterator<Item = B>,
    B: IntoIterator<Item = RawEntry>,
{
    let mut merger = Merger::new(now);
    for batch in batches {
        merger.add_batch(batch);
    }
    merger.finish()
}

/// Maps a raw entry to its canonical form, or `None` when it has neither a
/// usable link nor a title.
pub fn canonicalize(raw: RawEntry, now: DateTime<Utc>) -> Option<CanonicalEntry> {
    let identity = identity_for(&raw)?;
    let published_at = resolve_published(&raw, now);
    let link = raw.link.as_deref().and_then(valid_link);
    let title = raw
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string();

    Some(CanonicalEntry {
        identity,
        title,
        link,
        published_at,
        raw_body: raw.body.or(raw.summary).unwrap_or_default(),
        author: raw.author,
        tags: raw.tags,
        enclosures: raw.enclosures,
    })
}

/// The link when it is a well-formed http/https URL, otherwise
/// `title + "_" + date key`. The date key never reads the clock, so the same
/// item gets the same identity on every run.
pub fn identity_for(raw: &RawEntry) -> Option<String> {
    if let Some(link) = raw.link.as_deref().and_then(valid_link) {
        return Some(link);
    }

    let title = raw.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
    let date_key = raw
        .published_text
        .as_deref()
        .map(str::trim)
        .map(str::to_string)
        .or_else(|| raw.published_at.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
        .or_else(|| raw.updated_text.as_deref().map(str::trim).map(str::to_string))
        .or_else(|| raw.updated_at.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true)))
        .unwrap_or_default();

    Some(format!("{}_{}", title, date_key))
}

/// First match wins: published text, published time, updated text, updated
/// time, then `now`.
pub fn resolve_published(raw: &RawEntry, now: DateTime<Utc>) -> DateTime<Utc> {
    raw.published_text
        .as_deref()
        .and_then(parse_timestamp)
        .or(raw.published_at)
        .or_else(|| raw.updated_text.as_deref().and_then(parse_timestamp))
        .or(raw.updated_at)
        .unwrap_or(now)
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Returns the trimmed link when it parses as an absolute http/https URL.
pub fn valid_link(link: &str) -> Option<String> {
    let link = link.trim();
    let url = Url::parse(link).ok()?;
    if (url.scheme() == "http" || url.scheme() == "https") && url.host_str().is_some() {
        Some(link.to_string())
    } else {
        None
    }
}
