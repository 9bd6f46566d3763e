use super::sanitize;
use regex::Regex;
use std::sync::OnceLock;

fn line_break_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<br\s*/?>|</(p|div|li|blockquote|pre|h[1-6])\s*>").expect("valid regex")
    })
}

fn carriage_return_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)&#13;|&#x0?d;").expect("valid regex"))
}

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"))
}

fn script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>").expect("valid regex")
    })
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"))
}

fn leftover_entity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&[a-zA-Z0-9#]+;").expect("valid regex"))
}

/// ASCII-safe plain text derived from a raw HTML body.
///
/// The result holds only printable ASCII and line feeds, contains no
/// `&...;` sequences, and has no blank-line runs.
pub fn plain_text(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let text = line_break_regex().replace_all(raw, "\n");
    let text = carriage_return_regex().replace_all(&text, "\n");
    let text = comment_regex().replace_all(&text, "");
    let text = script_regex().replace_all(&text, "");
    let text = tag_regex().replace_all(&text, "");
    let decoded = html_escape::decode_html_entities(&text);

    let ascii: String = decoded
        .chars()
        .filter_map(ascii_equivalent)
        .collect();

    let mut stripped = ascii;
    while leftover_entity_regex().is_match(&stripped) {
        stripped = leftover_entity_regex().replace_all(&stripped, "").into_owned();
    }

    tidy_lines(&stripped)
}

/// Title text: tags removed, entities decoded once, whitespace collapsed.
///
/// Markup that only appears after decoding is removed as well, so the result
/// never contains an element. A `<` that survives is one no HTML parser reads
/// as a tag opener.
pub fn title_text(raw: &str) -> String {
    let without_tags = tag_regex().replace_all(raw, "");
    let decoded = html_escape::decode_html_entities(&without_tags);
    let cleaned = sanitize::strip_tags(&decoded);
    let text = html_escape::decode_html_entities(&cleaned);
    collapse_whitespace(&text)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn ascii_equivalent(c: char) -> Option<char> {
    match c {
        '\n' => Some('\n'),
        '\t' | '\u{a0}' => Some(' '),
        '\u{2018}' | '\u{2019}' | '\u{201b}' | '\u{2032}' => Some('\''),
        '\u{201c}' | '\u{201d}' | '\u{201f}' | '\u{2033}' => Some('"'),
        '\u{2010}'..='\u{2015}' => Some('-'),
        ' '..='~' => Some(c),
        _ => None,
    }
}

/// Collapses runs of spaces, trims each line and keeps at most one empty
/// line between paragraphs.
fn tidy_lines(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.split('\n') {
        let line = collapse_whitespace(line);
        if line.is_empty() && lines.last().map_or(true, |last| last.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
