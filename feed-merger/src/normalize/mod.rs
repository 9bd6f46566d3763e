pub mod origins;
pub mod paragraphs;
pub mod sanitize;
pub mod text;

pub use origins::{MirrorRewrite, OriginRegistry, OriginRule, RewriteError, SplitLongTitle, StripTitleSuffix};

use crate::merger::DEFAULT_TITLE;
use crate::types::{CanonicalEntry, EnclosureRef, NormalizedEntry};
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Sentences per synthesized `<p>` when a body has no structure.
    pub sentences_per_paragraph: usize,
    pub abbreviations: Vec<String>,
    /// Wrap bare inline images in a link to the full-size image.
    pub wrap_images: bool,
    pub max_body_bytes: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            sentences_per_paragraph: 5,
            abbreviations: paragraphs::DEFAULT_ABBREVIATIONS
                .iter()
                .map(|a| a.to_string())
                .collect(),
            wrap_images: true,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Turns canonical entries into display-safe ones.
pub struct Normalizer {
    config: NormalizerConfig,
    origins: OriginRegistry,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self {
            config,
            origins: OriginRegistry::with_defaults(),
        }
    }

    pub fn with_origins(mut self, origins: OriginRegistry) -> Self {
        self.origins = origins;
        self
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn normalize_all(&self, entries: Vec<CanonicalEntry>) -> Vec<NormalizedEntry> {
        entries.into_iter().map(|entry| self.normalize(entry)).collect()
    }

    pub fn normalize(&self, entry: CanonicalEntry) -> NormalizedEntry {
        let CanonicalEntry {
            identity,
            title,
            link,
            published_at,
            raw_body,
            author,
            tags,
            enclosures,
        } = entry;

        let raw_body = if raw_body.len() > self.config.max_body_bytes {
            warn!(
                "Body of {} is {} bytes (limit {}), dropping it",
                identity,
                raw_body.len(),
                self.config.max_body_bytes
            );
            String::new()
        } else {
            raw_body
        };

        let base = link.as_deref().and_then(|l| Url::parse(l).ok());
        let body_html = self.body_html(&raw_body, base.as_ref());
        let body_summary = text::plain_text(&raw_body);

        let title = text::title_text(&title);
        let title = if title.is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            title
        };

        let mut normalized = NormalizedEntry {
            identity,
            title,
            subheading: None,
            link,
            published_at,
            body_html,
            body_summary,
            images: Vec::new(),
            author: author.map(|a| text::title_text(&a)).filter(|a| !a.is_empty()),
            tags,
        };

        self.origins.apply(&mut normalized);
        normalized.images = collect_images(&normalized.body_html, &enclosures);

        debug!(
            "Normalized {} ({} images)",
            normalized.identity,
            normalized.images.len()
        );
        normalized
    }

    fn body_html(&self, raw: &str, base: Option<&Url>) -> String {
        let mut html = sanitize::clean(raw, base);

        if !html.trim().is_empty() && !paragraphs::has_block_markup(&html) {
            let paragraphed = paragraphs::auto_paragraph(
                &html,
                self.config.sentences_per_paragraph,
                &self.config.abbreviations,
            );
            // Sentence chunks can split inline elements; a second pass rebalances them.
            html = sanitize::clean(&paragraphed, base);
        }

        if self.config.wrap_images {
            html = sanitize::wrap_images(&html, base);
        }
        html
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

/// Inline images first, then image enclosures, without repeats.
fn collect_images(body_html: &str, enclosures: &[EnclosureRef]) -> Vec<String> {
    let mut images = sanitize::extract_images(body_html);
    let mut seen: HashSet<String> = images.iter().cloned().collect();

    for enclosure in enclosures.iter().filter(|e| e.is_image()) {
        if seen.insert(enclosure.url.clone()) {
            images.push(enclosure.url.clone());
        }
    }
    images
}
