use crate::types::{EnclosureRef, FeedDocument, MergerError, RawEntry, Result};
use feed_rs::parser;
use rss::Channel;
use tracing::{debug, info};

pub fn parse_document(document: &FeedDocument) -> Result<Vec<RawEntry>> {
    let entries = parse_feed_bytes(&document.body)?;
    info!("Parsed {} entries from {}", entries.len(), document.url);
    Ok(entries)
}

/// Extracts raw entries from an RSS, Atom or JSON feed.
///
/// RSS 2.0 goes through the `rss` reader first because it keeps the original
/// date strings; everything else (and RSS the reader rejects) falls back to
/// `feed-rs`, which yields already parsed timestamps.
pub fn parse_feed_bytes(content: &[u8]) -> Result<Vec<RawEntry>> {
    if content.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(MergerError::Parse("empty feed document".to_string()));
    }

    match Channel::read_from(content) {
        Ok(channel) => Ok(channel.items().iter().map(entry_from_rss_item).collect()),
        Err(rss_error) => {
            debug!("Not an RSS 2.0 channel ({}), trying generic parser", rss_error);
            let feed = parser::parse(content)
                .map_err(|e| MergerError::Parse(format!("Failed to parse feed: {}", e)))?;
            Ok(feed.entries.into_iter().map(entry_from_feed_rs).collect())
        }
    }
}

fn entry_from_rss_item(item: &rss::Item) -> RawEntry {
    let dublin_core = item.dublin_core_ext();

    let link = item.link().map(|s| s.to_string()).or_else(|| {
        item.guid()
            .filter(|guid| guid.is_permalink())
            .map(|guid| guid.value().to_string())
    });

    let published_text = item
        .pub_date()
        .map(|s| s.to_string())
        .or_else(|| dublin_core.and_then(|dc| dc.dates().first().cloned()));

    let author = item
        .author()
        .map(|s| s.to_string())
        .or_else(|| dublin_core.and_then(|dc| dc.creators().first().cloned()));

    // Full content is preferred over the summary for the body.
    let body = item
        .content()
        .or_else(|| item.description())
        .map(|s| s.to_string());

    let enclosures = item
        .enclosure()
        .map(|enclosure| EnclosureRef {
            url: enclosure.url().to_string(),
            mime_type: Some(enclosure.mime_type().to_string()).filter(|m| !m.is_empty()),
        })
        .into_iter()
        .collect();

    RawEntry {
        title: item.title().map(|s| s.to_string()),
        body,
        summary: item.description().map(|s| s.to_string()),
        link,
        published_text,
        published_at: None,
        updated_text: None,
        updated_at: None,
        author,
        tags: item.categories().iter().map(|c| c.name().to_string()).collect(),
        enclosures,
    }
}

fn entry_from_feed_rs(entry: feed_rs::model::Entry) -> RawEntry {
    let link = entry
        .links
        .iter()
        .find(|link| matches!(link.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|link| link.href.clone());

    let summary = entry.summary.map(|s| s.content);
    let body = entry
        .content
        .and_then(|content| content.body)
        .or_else(|| summary.clone());

    let mut enclosures: Vec<EnclosureRef> = entry
        .media
        .iter()
        .flat_map(|media| media.content.iter())
        .filter_map(|content| {
            content.url.as_ref().map(|url| EnclosureRef {
                url: url.to_string(),
                mime_type: content.content_type.as_ref().map(|m| m.to_string()),
            })
        })
        .collect();
    enclosures.extend(
        entry
            .links
            .iter()
            .filter(|link| link.rel.as_deref() == Some("enclosure"))
            .map(|link| EnclosureRef {
                url: link.href.clone(),
                mime_type: link.media_type.clone(),
            }),
    );

    RawEntry {
        title: entry.title.map(|t| t.content),
        body,
        summary,
        link,
        published_text: None,
        published_at: entry.published,
        updated_text: None,
        updated_at: entry.updated,
        author: entry.authors.first().map(|a| a.name.clone()),
        tags: entry.categories.into_iter().map(|c| c.term).collect(),
        enclosures,
    }
}
