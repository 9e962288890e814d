//! Draft generation: assembles the prompt context, parses the generated
//! JSON document, and normalizes it into a publishable [`Draft`].
use crate::config::Config;
use crate::html;
use crate::model::{Draft, ScoredItem, SourceText};
use crate::topics::Topic;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// One regeneration attempt is allowed before giving up on a candidate.
const MAX_ATTEMPTS: u32 = 2;

const FOCUS_KEYPHRASE_MAX_WORDS: usize = 4;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("content_too_short: {words} words < {min} required")]
    TooShort { words: usize, min: usize },
    #[error("draft mentions blocked term '{0}'")]
    BlockedTerm(String),
    #[error("invalid generation payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Returns the raw JSON document produced by the model.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Raw JSON fields as produced by the generation collaborator.
#[derive(Debug, Default, Deserialize)]
struct RawDraft {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    excerpt: String,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    seo_title: String,
    #[serde(default)]
    seo_description: String,
    #[serde(default)]
    focus_keyphrase: String,
    #[serde(default)]
    social_title: String,
    #[serde(default)]
    social_description: String,
    #[serde(default)]
    image_prompt: String,
    #[serde(default)]
    image_alt_text: String,
}

/// Assemble the generation prompt. Guidance and source text are forwarded
/// as opaque values; the pipeline never interprets their content.
pub fn build_generation_prompt(
    topic: &Topic,
    item: &ScoredItem,
    source: Option<&SourceText>,
    cfg: &Config,
) -> String {
    let candidate = &item.candidate;
    let mut prompt = format!(
        "Eres el redactor del vertical \"{name}\". Escribe un artículo original \
         en HTML (párrafos <p>, subtítulos <h2>/<h3>) de al menos {min_words} palabras \
         basado en la siguiente fuente.\n\
         {guidance}\n\
         \n\
         Fuente:\n\
         Título: {title}\n\
         URL: {url}\n\
         Fragmento: {snippet}\n",
        name = topic.name,
        min_words = cfg.content.min_body_words,
        guidance = topic.writing_guidance,
        title = candidate.title,
        url = candidate.url,
        snippet = candidate.snippet,
    );

    if let Some(source) = source.filter(|s| !s.text.is_empty()) {
        prompt.push_str("\nTexto de la fuente:\n");
        prompt.push_str(&source.text);
        prompt.push('\n');
        if !source.published_at.is_empty() {
            prompt.push_str(&format!("Fecha de publicación: {}\n", source.published_at));
        }
        if !source.author.is_empty() {
            prompt.push_str(&format!("Autor de la fuente: {}\n", source.author));
        }
    }

    if !cfg.content.blocked_terms.is_empty() {
        prompt.push_str(&format!(
            "\nNo menciones bajo ninguna circunstancia: {}.\n",
            cfg.content.blocked_terms.join(", ")
        ));
    }

    prompt.push_str(
        "\nResponde SOLO con un JSON con estos campos: title, body, excerpt, \
         categories, tags, seo_title, seo_description, focus_keyphrase, \
         social_title, social_description, image_prompt, image_alt_text. \
         Sin markdown ni texto adicional.",
    );
    prompt
}

/// Remove a markdown code fence when the model wraps its JSON in one.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let without_open = match trimmed.split_once('\n') {
        Some((_, rest)) => rest,
        None => &trimmed[3..],
    };
    without_open
        .trim_end()
        .trim_end_matches("```")
        .trim()
        .to_string()
}

fn normalize_tags(tags: &[String], max_tags: usize) -> Vec<String> {
    let mut normalized = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for raw in tags {
        let tag = html::clean_spaces(raw);
        if tag.is_empty() {
            continue;
        }
        if !seen.insert(tag.to_lowercase()) {
            continue;
        }
        normalized.push(tag);
        if normalized.len() >= max_tags {
            break;
        }
    }
    normalized
}

fn extract_focus_keyphrase(raw: &RawDraft, title: &str, tags: &[String]) -> String {
    let explicit = html::clean_spaces(&raw.focus_keyphrase);
    let phrase = if !explicit.is_empty() {
        explicit
    } else if let Some(first_tag) = tags.first() {
        first_tag.clone()
    } else {
        title.to_string()
    };
    let capped: Vec<&str> = phrase
        .split_whitespace()
        .take(FOCUS_KEYPHRASE_MAX_WORDS)
        .collect();
    html::truncate(&capped.join(" "), 60, false)
}

/// Guarantee the keyphrase appears in the text, prefixing it when absent.
fn ensure_keyphrase(text: &str, keyphrase: &str, max_len: usize, strict: bool) -> String {
    let text = html::truncate(text, max_len, true);
    if keyphrase.is_empty() || html::contains_keyphrase(&text, keyphrase, strict) {
        return text;
    }
    html::truncate(&format!("{keyphrase}: {text}"), max_len, true)
}

/// Append ` | Site` when the site title is configured, fits, and is not
/// already present.
fn with_site_suffix(title: &str, max_len: usize, site_title: &str, separator: &str) -> String {
    let base = html::truncate(title, max_len, false);
    let site_title = html::clean_spaces(site_title);
    if site_title.is_empty() {
        return base;
    }
    let separator = {
        let s = html::clean_spaces(separator);
        if s.is_empty() {
            "|".to_string()
        } else {
            s
        }
    };
    if html::normalize_for_compare(&base).contains(&html::normalize_for_compare(&site_title)) {
        return base;
    }

    let suffix = format!(" {separator} {site_title}");
    if base.chars().count() + suffix.chars().count() <= max_len {
        return format!("{base}{suffix}");
    }
    let allowed = max_len.saturating_sub(suffix.chars().count());
    if allowed <= 10 {
        return base;
    }
    let cut = html::truncate(&base, allowed, false);
    format!("{}{suffix}", cut.trim_end_matches([' ', ':', ';', ',', '-', '|', '/']))
}

/// Scan all text fields for a configured blocked term. Terms of up to three
/// characters must match a whole token to avoid false substring hits.
pub fn find_blocked_term(draft: &Draft, blocked_terms: &[String]) -> Option<String> {
    let haystack = html::normalize_for_compare(&format!(
        "{} {} {} {} {} {} {} {} {}",
        draft.title,
        html::strip_tags(&draft.body_html),
        draft.excerpt,
        draft.seo_title,
        draft.seo_description,
        draft.social_title,
        draft.social_description,
        draft.image_alt_text,
        draft.tags.join(" "),
    ));
    let tokens: std::collections::HashSet<&str> = haystack.split(' ').collect();
    for term in blocked_terms {
        let needle = html::normalize_for_compare(term);
        if needle.is_empty() {
            continue;
        }
        if needle.chars().count() <= 3 && !needle.contains(' ') {
            if tokens.contains(needle.as_str()) {
                return Some(term.clone());
            }
            continue;
        }
        if haystack.contains(&needle) {
            return Some(term.clone());
        }
    }
    None
}

fn normalize_draft(raw: RawDraft, topic: &Topic, cfg: &Config) -> Draft {
    let strict = cfg.seo.strict_keyphrase;
    let title = html::truncate(&raw.title, cfg.content.title_max_len, false);
    let plain_text = html::strip_tags(&raw.body);

    let excerpt = {
        let base = if raw.excerpt.trim().is_empty() {
            plain_text.clone()
        } else {
            raw.excerpt.clone()
        };
        html::truncate(&base, cfg.content.excerpt_max_len, true)
    };

    let categories: Vec<String> = {
        let cleaned: Vec<String> = raw
            .categories
            .iter()
            .map(|c| html::clean_spaces(c))
            .filter(|c| !c.is_empty())
            .collect();
        if cleaned.is_empty() {
            topic.categories.clone()
        } else {
            cleaned
        }
    };
    let tags = normalize_tags(&raw.tags, cfg.content.max_tags);
    let focus_keyphrase = extract_focus_keyphrase(&raw, &title, &tags);

    let seo_base = {
        let base = if raw.seo_title.trim().is_empty() {
            title.clone()
        } else {
            raw.seo_title.clone()
        };
        ensure_keyphrase(&base, &focus_keyphrase, cfg.seo.seo_title_max_len, strict)
    };
    let seo_title = with_site_suffix(
        &seo_base,
        cfg.seo.seo_title_max_len,
        &cfg.wordpress.site_title,
        &cfg.wordpress.title_separator,
    );

    let seo_description = {
        let base = if raw.seo_description.trim().is_empty() {
            excerpt.clone()
        } else {
            raw.seo_description.clone()
        };
        ensure_keyphrase(&base, &focus_keyphrase, cfg.seo.seo_description_max_len, strict)
    };

    let social_title = {
        let base = if raw.social_title.trim().is_empty() {
            seo_title.clone()
        } else {
            raw.social_title.clone()
        };
        with_site_suffix(
            &base,
            cfg.seo.social_title_max_len,
            &cfg.wordpress.site_title,
            &cfg.wordpress.title_separator,
        )
    };
    let social_description = {
        let base = if raw.social_description.trim().is_empty() {
            seo_description.clone()
        } else {
            raw.social_description.clone()
        };
        ensure_keyphrase(
            &base,
            &focus_keyphrase,
            cfg.seo.social_description_max_len,
            strict,
        )
    };

    let image_alt_text = {
        let base = if raw.image_alt_text.trim().is_empty() {
            format!("{title} - imagen de portada")
        } else {
            raw.image_alt_text.clone()
        };
        html::truncate(&base, 125, false)
    };

    Draft {
        title,
        body_html: raw.body,
        excerpt,
        categories,
        tags,
        seo_title,
        seo_description,
        focus_keyphrase,
        social_title,
        social_description,
        image_prompt: html::clean_spaces(&raw.image_prompt),
        image_alt_text,
        cover_image_ref: None,
    }
}

/// Generate a draft for the selected item. A bounded attempt loop: the
/// first failure (short body, invalid payload, blocked term) consumes the
/// single retry; the second terminates the candidate.
pub async fn generate_draft(
    generator: &dyn ContentGenerator,
    topic: &Topic,
    item: &ScoredItem,
    source: Option<&SourceText>,
    cfg: &Config,
) -> Result<Draft, GenerationError> {
    let prompt = build_generation_prompt(topic, item, source, cfg);
    let mut last_err: Option<GenerationError> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let raw_text = match generator.generate(&prompt).await {
            Ok(text) => strip_code_fences(&text),
            Err(err) => {
                warn!(?err, attempt, "generation call failed");
                last_err = Some(GenerationError::Provider(err));
                continue;
            }
        };

        let raw: RawDraft = match serde_json::from_str(&raw_text) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, attempt, "generation payload was not valid JSON");
                last_err = Some(GenerationError::InvalidPayload(err.to_string()));
                continue;
            }
        };

        let words = html::word_count_html(&raw.body);
        if words < cfg.content.min_body_words {
            warn!(
                attempt,
                words,
                min = cfg.content.min_body_words,
                "generated body too short"
            );
            last_err = Some(GenerationError::TooShort {
                words,
                min: cfg.content.min_body_words,
            });
            continue;
        }

        let draft = normalize_draft(raw, topic, cfg);
        if let Some(term) = find_blocked_term(&draft, &cfg.content.blocked_terms) {
            warn!(attempt, term = %term, "draft mentions a blocked term");
            last_err = Some(GenerationError::BlockedTerm(term));
            continue;
        }

        info!(title = %draft.title, words, "draft generated");
        return Ok(draft);
    }

    Err(last_err.unwrap_or(GenerationError::InvalidPayload("no attempts ran".into())))
}
