use crate::config::read_list;
use crate::types::{NormalizedEntry, Result};
use std::path::Path;
use tracing::info;

/// Case-insensitive substring exclusion over an entry's visible text.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    /// Blank entries and `#` comments are ignored.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty() && !k.starts_with('#'))
            .collect();
        Self { keywords }
    }

    /// Loads one keyword per line. A missing file is a configuration error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let keywords = read_list(path)?;
        info!("Loaded {} filter keywords from {}", keywords.len(), path.display());
        Ok(Self::new(keywords))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// First keyword found in the title, subheading, plain-text body or link.
    /// Markup is never searched, so attributes the sanitizer adds cannot match.
    pub fn matching_keyword(&self, entry: &NormalizedEntry) -> Option<&str> {
        if self.keywords.is_empty() {
            return None;
        }

        let haystacks: Vec<String> = [
            Some(entry.title.as_str()),
            entry.subheading.as_deref(),
            Some(entry.body_summary.as_str()),
            entry.link.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .collect();

        self.keywords
            .iter()
            .find(|keyword| haystacks.iter().any(|text| text.contains(keyword.as_str())))
            .map(String::as_str)
    }

    pub fn excludes(&self, entry: &NormalizedEntry) -> bool {
        self.matching_keyword(entry).is_some()
    }

    /// Returns the kept entries, in order, and the number excluded.
    pub fn filter(&self, entries: Vec<NormalizedEntry>) -> (Vec<NormalizedEntry>, usize) {
        let mut excluded = 0;
        let kept = entries
            .into_iter()
            .filter(|entry| match self.matching_keyword(entry) {
                Some(keyword) => {
                    info!("Excluding \"{}\" (matched keyword \"{}\")", entry.title, keyword);
                    excluded += 1;
                    false
                }
                None => true,
            })
            .collect();
        (kept, excluded)
    }
}
