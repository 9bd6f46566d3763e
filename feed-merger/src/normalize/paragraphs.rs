use regex::Regex;
use std::sync::OnceLock;

/// Abbreviations whose trailing period never ends a sentence.
pub const DEFAULT_ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "Sr.", "Jr.", "St.", "Mt.", "U.S.", "U.K.", "e.g.",
    "i.e.", "etc.", "vs.", "Inc.", "Ltd.", "Co.", "No.", "Jan.", "Feb.", "Aug.", "Sept.", "Oct.",
    "Nov.", "Dec.",
];

fn block_markup_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(p|br|ul|ol|li|blockquote|pre)[\s/>]").expect("valid regex"))
}

/// True when the HTML already carries its own paragraph or line structure.
pub fn has_block_markup(html: &str) -> bool {
    block_markup_regex().is_match(html)
}

/// Groups every `per_paragraph` sentences into one `<p>` element.
pub fn auto_paragraph<S: AsRef<str>>(html: &str, per_paragraph: usize, abbreviations: &[S]) -> String {
    let sentences = split_sentences(html, abbreviations);
    sentences
        .chunks(per_paragraph.max(1))
        .map(|chunk| format!("<p>{}</p>", chunk.join(" ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits on `.`, `!` or `?` followed by whitespace. Punctuation inside tags
/// and after a known abbreviation is ignored.
pub fn split_sentences<S: AsRef<str>>(text: &str, abbreviations: &[S]) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut in_tag = false;
    let mut chars = text.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            '.' | '!' | '?' if !in_tag => {
                let followed_by_space = chars.peek().is_some_and(|(_, next)| next.is_whitespace());
                if !followed_by_space {
                    continue;
                }
                let end = index + c.len_utf8();
                if c == '.' && ends_with_abbreviation(&text[start..end], abbreviations) {
                    continue;
                }
                push_sentence(&mut sentences, &text[start..end]);
                start = end;
            }
            _ => {}
        }
    }
    push_sentence(&mut sentences, &text[start..]);

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, candidate: &str) {
    let sentence = candidate.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }
}

fn ends_with_abbreviation<S: AsRef<str>>(sentence: &str, abbreviations: &[S]) -> bool {
    let word = sentence
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or_default();
    let word = word.rsplit('>').next().unwrap_or_default();
    let word = word.trim_start_matches(|c: char| !c.is_alphanumeric());

    abbreviations
        .iter()
        .any(|abbreviation| abbreviation.as_ref().eq_ignore_ascii_case(word))
}
