use crate::types::{MergerError, NormalizedEntry, Result};
use rss::{Category, Channel, Guid, Item};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

pub const CHANNEL_TITLE: &str = "Merged Feed";
pub const CHANNEL_LINK: &str = "https://github.com/feed-merger/feed-merger";
pub const CHANNEL_DESCRIPTION: &str = "Merged, deduplicated and sanitized feed.";
pub const GENERATOR: &str = "feed-merger";

const PUB_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S +0000";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Rss,
    Json,
}

/// Item description: the subheading as an escaped `<h2>` followed by the
/// sanitized body.
pub fn item_html(entry: &NormalizedEntry) -> String {
    match entry.subheading.as_deref().filter(|s| !s.is_empty()) {
        Some(subheading) => format!(
            "<h2>{}</h2>\n{}",
            html_escape::encode_text(subheading),
            entry.body_html
        ),
        None => entry.body_html.clone(),
    }
}

pub fn build_channel(entries: &[NormalizedEntry]) -> Channel {
    let items: Vec<Item> = entries.iter().map(build_item).collect();

    let mut channel = Channel::default();
    channel.set_title(CHANNEL_TITLE);
    channel.set_link(CHANNEL_LINK);
    channel.set_description(CHANNEL_DESCRIPTION);
    channel.set_language(Some("en".to_string()));
    channel.set_generator(Some(GENERATOR.to_string()));
    channel.set_items(items);
    channel
}

fn build_item(entry: &NormalizedEntry) -> Item {
    let mut guid = Guid::default();
    guid.set_value(entry.identity.clone());
    guid.set_permalink(entry.link.as_deref() == Some(entry.identity.as_str()));

    let categories: Vec<Category> = entry
        .tags
        .iter()
        .map(|tag| {
            let mut category = Category::default();
            category.set_name(tag.clone());
            category
        })
        .collect();

    let mut item = Item::default();
    item.set_title(Some(entry.title.clone()));
    item.set_link(entry.link.clone());
    item.set_guid(Some(guid));
    item.set_pub_date(Some(entry.published_at.format(PUB_DATE_FORMAT).to_string()));
    item.set_description(Some(item_html(entry)));
    item.set_author(entry.author.clone());
    item.set_categories(categories);
    item
}

pub fn render(entries: &[NormalizedEntry], format: OutputFormat) -> Result<Vec<u8>> {
    match format {
        OutputFormat::Rss => build_channel(entries)
            .write_to(Vec::new())
            .map_err(|e| MergerError::Output(format!("Failed to serialize RSS: {}", e))),
        OutputFormat::Json => Ok(serde_json::to_vec_pretty(entries)?),
    }
}

/// Renders and writes the document, replacing `path` atomically.
pub fn write_feed(path: &Path, entries: &[NormalizedEntry], format: OutputFormat) -> Result<()> {
    let document = render(entries, format)?;

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(&document)?;
    file.flush()?;
    file.persist(path).map_err(|e| MergerError::Io(e.error))?;

    info!(
        "Wrote {} entries to {} ({} bytes)",
        entries.len(),
        path.display(),
        document.len()
    );
    Ok(())
}
