//! Small HTML/text helpers shared by the drafting and SEO modules.
//!
//! Generated bodies are well-formed enough that regex-level handling is
//! sufficient; nothing here claims to parse arbitrary web markup.
use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<svg\b.*?</svg>|<nav\b.*?</nav>|<footer\b.*?</footer>",
    )
    .unwrap()
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static WORDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());
static ANCHORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).unwrap()
});
static HEADINGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<h[23]\b[^>]*>(.*?)</h[23]>").unwrap());
static PARAGRAPHS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").unwrap());

/// Strip tags and collapse whitespace, dropping script/style-like blocks.
pub fn strip_tags(html: &str) -> String {
    let without_blocks = SCRIPT_BLOCKS.replace_all(html, " ");
    let without_tags = TAGS.replace_all(&without_blocks, " ");
    clean_spaces(&without_tags)
}

/// Collapse all whitespace runs into single spaces and trim.
pub fn clean_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Count words in plain text (unicode-aware).
pub fn word_count(text: &str) -> usize {
    WORDS.find_iter(text).count()
}

/// Count words in an HTML fragment after stripping tags.
pub fn word_count_html(html: &str) -> usize {
    word_count(&strip_tags(html))
}

/// An anchor found in a body, with its href and rendered label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: String,
    pub label: String,
    pub raw: String,
}

/// All anchors in document order.
pub fn anchors(html: &str) -> Vec<Anchor> {
    ANCHORS
        .captures_iter(html)
        .map(|cap| Anchor {
            href: cap[1].trim().to_string(),
            label: strip_tags(&cap[2]),
            raw: cap[0].to_string(),
        })
        .collect()
}

/// Inner text of every `<h2>`/`<h3>` heading.
pub fn subheadings(html: &str) -> Vec<String> {
    HEADINGS
        .captures_iter(html)
        .map(|cap| strip_tags(&cap[1]))
        .collect()
}

/// Plain text of the first paragraph, or of the whole body when no `<p>`
/// is present.
pub fn first_paragraph(html: &str) -> String {
    PARAGRAPHS
        .captures_iter(html)
        .map(|cap| strip_tags(&cap[1]))
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| strip_tags(html))
}

/// Truncate on a word boundary to at most `max_len` characters.
pub fn truncate(text: &str, max_len: usize, add_ellipsis: bool) -> String {
    let text = clean_spaces(text);
    if text.chars().count() <= max_len {
        return text;
    }
    let hard_cut: String = text.chars().take(max_len).collect();
    let cut = match hard_cut.rsplit_once(' ') {
        Some((head, _)) if !head.is_empty() => head.to_string(),
        _ => hard_cut,
    };
    if add_ellipsis && cut.chars().count() + 3 <= max_len {
        format!("{cut}...")
    } else {
        cut
    }
}

/// Lowercase, fold common Spanish accents, and drop punctuation so phrase
/// comparisons are stable across the model's formatting choices.
pub fn normalize_for_compare(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ñ' => 'n',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .collect();
    clean_spaces(&folded)
}

/// Phrase containment check. Strict mode requires the whole phrase as a
/// substring; permissive mode accepts every phrase token appearing
/// somewhere in the text.
pub fn contains_keyphrase(text: &str, keyphrase: &str, strict: bool) -> bool {
    let text_n = normalize_for_compare(text);
    let phrase_n = normalize_for_compare(keyphrase);
    if phrase_n.is_empty() {
        return true;
    }
    if text_n.contains(&phrase_n) {
        return true;
    }
    if strict {
        return false;
    }
    let tokens: std::collections::HashSet<&str> = text_n.split(' ').collect();
    phrase_n.split(' ').all(|t| tokens.contains(t))
}

/// WordPress-style slug: ascii-folded, hyphen-separated, capped at 90 chars.
pub fn slugify(value: &str) -> String {
    let normalized = normalize_for_compare(value);
    let slug = normalized.replace(' ', "-");
    slug.chars().take(90).collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// Host of a URL, lowercased; empty when the URL does not parse.
pub fn domain_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_default()
        .to_lowercase()
}

/// Public http(s) URL check; rejects loopback and .local hosts.
pub fn is_public_http_url(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url.trim()) else {
        return false;
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return false;
    }
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_lowercase();
    !(host.is_empty()
        || host == "localhost"
        || host == "127.0.0.1"
        || host == "0.0.0.0"
        || host == "::1"
        || host.ends_with(".local"))
}
