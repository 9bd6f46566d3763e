use crate::types::NormalizedEntry;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};
use url::Url;

/// Split priority for long titles. The first kind present in the window wins.
const TITLE_SPLIT_MARKS: &[char] = &['.', '?', ':', '-', ','];

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("Cannot rewrite unparseable URL: {0}")]
    InvalidUrl(String),

    #[error("Cannot set host {host} on {url}")]
    Host { url: String, host: String },
}

/// A source-specific adjustment applied after sanitization.
pub trait OriginRule: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, entry: &mut NormalizedEntry) -> Result<(), RewriteError>;
}

/// Moves the tail of an over-long title into the subheading.
pub struct SplitLongTitle {
    pub max_len: usize,
}

impl OriginRule for SplitLongTitle {
    fn name(&self) -> &str {
        "split-long-title"
    }

    fn apply(&self, entry: &mut NormalizedEntry) -> Result<(), RewriteError> {
        if let (head, Some(tail)) = split_title(&entry.title, self.max_len) {
            entry.title = head;
            entry.subheading = Some(match entry.subheading.take() {
                Some(existing) if !existing.is_empty() => format!("{} {}", tail, existing),
                _ => tail,
            });
        }
        Ok(())
    }
}

/// Points links at a mirror host.
pub struct MirrorRewrite {
    pub from: String,
    pub to: String,
}

impl MirrorRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    fn matches(&self, host: &str) -> bool {
        normalize_host(host) == self.from
    }

    fn rewrite_url(&self, raw: &str) -> Result<Option<String>, RewriteError> {
        let mut url = Url::parse(raw).map_err(|_| RewriteError::InvalidUrl(raw.to_string()))?;
        if !url.host_str().is_some_and(|host| self.matches(host)) {
            return Ok(None);
        }
        url.set_host(Some(&self.to)).map_err(|_| RewriteError::Host {
            url: raw.to_string(),
            host: self.to.clone(),
        })?;
        Ok(Some(url.to_string()))
    }
}

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href="([^"]*)""#).expect("valid regex"))
}

impl OriginRule for MirrorRewrite {
    fn name(&self) -> &str {
        "mirror-rewrite"
    }

    fn apply(&self, entry: &mut NormalizedEntry) -> Result<(), RewriteError> {
        if let Some(link) = entry.link.as_deref() {
            if let Some(rewritten) = self.rewrite_url(link)? {
                entry.link = Some(rewritten);
            }
        }

        let mut failure = None;
        let body = href_regex().replace_all(&entry.body_html, |caps: &Captures| {
            let decoded = html_escape::decode_html_entities(&caps[1]);
            match self.rewrite_url(&decoded) {
                Ok(Some(url)) => format!(
                    r#"href="{}""#,
                    html_escape::encode_double_quoted_attribute(&url)
                ),
                Ok(None) | Err(RewriteError::InvalidUrl(_)) => caps[0].to_string(),
                Err(e) => {
                    failure.get_or_insert(e);
                    caps[0].to_string()
                }
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        entry.body_html = body.into_owned();
        Ok(())
    }
}

/// Moves boilerplate such as " | Hacker News" out of the title.
pub struct StripTitleSuffix {
    pub suffix: String,
}

impl OriginRule for StripTitleSuffix {
    fn name(&self) -> &str {
        "strip-title-suffix"
    }

    fn apply(&self, entry: &mut NormalizedEntry) -> Result<(), RewriteError> {
        let Some(head) = entry.title.strip_suffix(self.suffix.as_str()) else {
            return Ok(());
        };
        let head = head.trim_end();
        if head.is_empty() {
            return Ok(());
        }
        let removed = self.suffix.trim_start_matches(|c: char| c == '|' || c.is_whitespace());

        entry.title = head.to_string();
        if entry.subheading.as_deref().map_or(true, str::is_empty) && !removed.is_empty() {
            entry.subheading = Some(removed.to_string());
        }
        Ok(())
    }
}

pub type RuleSet = Vec<Box<dyn OriginRule>>;

/// Host to rule set dispatch. Exact hosts are checked first, then suffixes
/// from longest to shortest; one rule set at most applies to an entry.
#[derive(Default)]
pub struct OriginRegistry {
    exact: HashMap<String, RuleSet>,
    suffix: Vec<(String, RuleSet)>,
}

impl OriginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_suffix(
            "reddit.com",
            vec![
                Box::new(SplitLongTitle { max_len: 120 }),
                Box::new(MirrorRewrite::new("reddit.com", "old.reddit.com")),
            ],
        );
        registry.register_exact(
            "news.ycombinator.com",
            vec![Box::new(StripTitleSuffix {
                suffix: " | Hacker News".to_string(),
            })],
        );
        registry.register_exact(
            "x.com",
            vec![Box::new(MirrorRewrite::new("x.com", "xcancel.com"))],
        );
        registry.register_exact(
            "twitter.com",
            vec![Box::new(MirrorRewrite::new("twitter.com", "xcancel.com"))],
        );
        registry
    }

    pub fn register_exact(&mut self, host: &str, rules: RuleSet) {
        self.exact.insert(normalize_host(host), rules);
    }

    pub fn register_suffix(&mut self, suffix: &str, rules: RuleSet) {
        let suffix = normalize_host(suffix);
        self.suffix.retain(|(existing, _)| *existing != suffix);
        self.suffix.push((suffix, rules));
        self.suffix.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    pub fn lookup(&self, host: &str) -> Option<&RuleSet> {
        let host = normalize_host(host);
        if let Some(rules) = self.exact.get(&host) {
            return Some(rules);
        }
        self.suffix
            .iter()
            .find(|(suffix, _)| {
                host == *suffix
                    || host
                        .strip_suffix(suffix.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
            .map(|(_, rules)| rules)
    }

    /// Applies the rule set for the entry's link host. A failing rule leaves
    /// the entry as it was before that rule.
    pub fn apply(&self, entry: &mut NormalizedEntry) {
        let Some(host) = entry
            .link
            .as_deref()
            .and_then(|link| Url::parse(link).ok())
            .and_then(|url| url.host_str().map(|h| h.to_string()))
        else {
            return;
        };
        let Some(rules) = self.lookup(&host) else {
            return;
        };

        for rule in rules {
            let mut candidate = entry.clone();
            match rule.apply(&mut candidate) {
                Ok(()) => {
                    debug!("Applied {} to {}", rule.name(), entry.identity);
                    *entry = candidate;
                }
                Err(e) => warn!("Rule {} failed for {}: {}", rule.name(), entry.identity, e),
            }
        }
    }
}

/// Lower-cases and drops a leading `www.`.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Splits a title longer than `max_len` characters into head and remainder.
///
/// Within the first `max_len` characters the last occurrence of the first
/// mark present (in `.`, `?`, `:`, `-`, `,` order) is the split point;
/// `.` and `?` stay on the head, the others are dropped. Without any mark
/// the title is cut at `max_len`.
pub fn split_title(title: &str, max_len: usize) -> (String, Option<String>) {
    if title.chars().count() <= max_len {
        return (title.to_string(), None);
    }

    let window_end = title
        .char_indices()
        .nth(max_len)
        .map(|(index, _)| index)
        .unwrap_or(title.len());
    let window = &title[..window_end];

    for &mark in TITLE_SPLIT_MARKS {
        let Some(position) = window.rfind(mark) else {
            continue;
        };
        let head_end = if matches!(mark, '.' | '?') {
            position + mark.len_utf8()
        } else {
            position
        };
        let head = title[..head_end].trim();
        let tail = title[position + mark.len_utf8()..].trim();
        if !head.is_empty() && !tail.is_empty() {
            return (head.to_string(), Some(tail.to_string()));
        }
    }

    let head = window.trim();
    let tail = title[window_end..].trim();
    if head.is_empty() || tail.is_empty() {
        return (title.to_string(), None);
    }
    (head.to_string(), Some(tail.to_string()))
}
