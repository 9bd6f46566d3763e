use ammonia::{Builder, UrlRelative};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use url::Url;

pub const ALLOWED_TAGS: &[&str] = &[
    "p",
    "br",
    "ul",
    "ol",
    "li",
    "strong",
    "em",
    "b",
    "i",
    "a",
    "img",
    "blockquote",
    "code",
    "pre",
];

pub const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mailto"];

pub const LINK_REL: &str = "noopener noreferrer nofollow";

fn img_src_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<img\b[^>]*?\ssrc="([^"]*)""#).expect("valid regex"))
}

fn anchor_or_img_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(/?)(a|img)\b[^>]*>").expect("valid regex"))
}

fn builder(base: Option<&Url>) -> Builder<'static> {
    let mut tag_attributes = HashMap::new();
    tag_attributes.insert("a", HashSet::from(["href"]));
    tag_attributes.insert("img", HashSet::from(["src", "alt", "title"]));

    let url_relative = match base {
        Some(base) => UrlRelative::RewriteWithBase(base.clone()),
        None => UrlRelative::Deny,
    };

    let mut builder = Builder::empty();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .clean_content_tags(HashSet::from(["script", "style"]))
        .tag_attributes(tag_attributes)
        .url_schemes(ALLOWED_SCHEMES.iter().copied().collect())
        .link_rel(Some(LINK_REL))
        .set_tag_attribute_value("a", "target", "_blank")
        .set_tag_attribute_value("img", "loading", "lazy")
        .strip_comments(true)
        .url_relative(url_relative);
    builder
}

/// Reduces untrusted HTML to the allowed tag and attribute set.
///
/// Relative `href`/`src` values are resolved against `base` (normally the
/// entry link) and dropped when there is none. Entities are decoded by the
/// HTML parser and re-escaped on output, so they are handled exactly once.
pub fn clean(html: &str, base: Option<&Url>) -> String {
    builder(base).clean(html).to_string()
}

/// Removes every element from already-decoded text and returns the rest
/// HTML-escaped.
///
/// `&` is taken literally, so entities are not decoded a second time. Script
/// and style content is dropped along with the tags.
pub fn strip_tags(text: &str) -> String {
    let mut builder = Builder::empty();
    builder
        .clean_content_tags(HashSet::from(["script", "style"]))
        .strip_comments(true);
    builder.clean(&text.replace('&', "&amp;")).to_string()
}

/// Image sources in document order, entity-decoded and deduplicated.
pub fn extract_images(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    img_src_regex()
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned())
        .filter(|src| !src.is_empty() && seen.insert(src.clone()))
        .collect()
}

/// Wraps every image that is not already inside an anchor in a link to the
/// image itself. Expects sanitizer output; the result is cleaned again so
/// the new anchors carry the standard attributes.
pub fn wrap_images(html: &str, base: Option<&Url>) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    let mut anchor_depth: usize = 0;
    let mut wrapped = false;

    for caps in anchor_or_img_regex().captures_iter(html) {
        let (Some(tag), Some(closing), Some(name)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let closing = !closing.as_str().is_empty();

        if name.as_str().eq_ignore_ascii_case("a") {
            anchor_depth = if closing {
                anchor_depth.saturating_sub(1)
            } else {
                anchor_depth + 1
            };
            continue;
        }

        if anchor_depth > 0 || closing {
            continue;
        }
        let Some(src) = img_src_regex().captures(tag.as_str()).and_then(|c| c.get(1)) else {
            continue;
        };
        if src.as_str().is_empty() {
            continue;
        }

        out.push_str(&html[last..tag.start()]);
        out.push_str(&format!(r#"<a href="{}">{}</a>"#, src.as_str(), tag.as_str()));
        last = tag.end();
        wrapped = true;
    }

    if !wrapped {
        return html.to_string();
    }
    out.push_str(&html[last..]);
    clean(&out, base)
}
