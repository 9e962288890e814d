//! Local SEO gate: a deterministic, rule-based evaluation of a draft.
//! No external calls; identical inputs always produce identical reports.
use crate::config::Config;
use crate::html;
use crate::links;
use crate::model::{Draft, SeoCheck, SeoReport, SeoVerdict};
use chrono::{DateTime, Utc};

/// Rules that must hold regardless of the composite scores.
const MUST_RULES: &[&str] = &["title_length", "keyphrase_in_description"];

const POWER_WORDS: &[&str] = &[
    "guía", "guia", "claves", "nuevo", "nueva", "mejor", "mejores", "esencial",
    "definitivo", "secretos", "consejos", "descubre", "increíble", "importante",
    "urgente", "revela", "new", "best", "guide", "essential", "proven",
    "ultimate", "secrets", "tips",
];

fn check(key: &str, passed: bool, weight: f64) -> SeoCheck {
    SeoCheck {
        key: key.to_string(),
        passed,
        weight,
    }
}

fn score_from_checks(checks: &[SeoCheck]) -> u32 {
    let total: f64 = checks.iter().map(|c| c.weight).sum();
    if total <= 0.0 {
        return 0;
    }
    let earned: f64 = checks.iter().filter(|c| c.passed).map(|c| c.weight).sum();
    (earned / total * 100.0).round() as u32
}

/// Content-quality checks over the cleaned draft.
fn content_checks(draft: &Draft, cfg: &Config, external_required: bool) -> Vec<SeoCheck> {
    let strict = cfg.seo.strict_keyphrase;
    let body_text = html::strip_tags(&draft.body_html);
    let words = html::word_count(&body_text);
    let link_stats = links::count_links(&draft.body_html, &cfg.site_domain());
    let has_subheading = !html::subheadings(&draft.body_html).is_empty();

    vec![
        check(
            "title_length",
            draft.title.chars().count() <= cfg.content.title_max_len,
            1.0,
        ),
        check(
            "keyphrase_in_description",
            html::contains_keyphrase(&draft.seo_description, &draft.focus_keyphrase, strict),
            1.0,
        ),
        check(
            "keyphrase_in_title",
            html::contains_keyphrase(&draft.seo_title, &draft.focus_keyphrase, strict),
            1.0,
        ),
        check(
            "description_length",
            {
                let len = draft.seo_description.chars().count();
                (80..=cfg.seo.seo_description_max_len).contains(&len)
            },
            0.5,
        ),
        check("internal_links", link_stats.internal >= 1, 2.0),
        check(
            "external_link",
            !external_required || link_stats.external >= 1,
            0.5,
        ),
        check("content_length", words >= cfg.content.min_body_words, 1.0),
        check(
            "subheading_present",
            words <= 300 || has_subheading,
            1.0,
        ),
    ]
}

/// Fixed headline rubric: length band, word count, power words, and
/// numeric/question patterns, with the keyphrase-early check weighted up.
pub fn headline_checks(title: &str, keyphrase: &str) -> Vec<SeoCheck> {
    let clean = html::clean_spaces(title);
    let normalized = html::normalize_for_compare(&clean);
    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    let chars_without_spaces = clean.chars().filter(|c| !c.is_whitespace()).count();

    let mut checks = vec![
        check("headline_character_count", chars_without_spaces > 35, 1.0),
        check("headline_word_count", words.len() > 5, 1.0),
        check("headline_length_band", clean.chars().count() <= 65, 0.75),
        check(
            "headline_power_word",
            POWER_WORDS.iter().any(|p| {
                let p = html::normalize_for_compare(p);
                words.iter().any(|w| **w == *p)
            }),
            1.0,
        ),
        check(
            "headline_number_or_question",
            clean.ends_with('?')
                || clean.chars().any(|c| c.is_ascii_digit())
                || normalized.starts_with("como ")
                || normalized.starts_with("how "),
            0.75,
        ),
    ];

    if !keyphrase.trim().is_empty() {
        let first_chunk = words.iter().take(8).cloned().collect::<Vec<_>>().join(" ");
        checks.push(check(
            "headline_keyphrase_early",
            html::contains_keyphrase(&first_chunk, keyphrase, false),
            1.25,
        ));
    }
    checks
}

/// Evaluate a cleaned draft and assemble the persisted report.
/// Pass iff both composite scores clear their thresholds and every must
/// rule holds.
pub fn evaluate(
    draft: &Draft,
    cfg: &Config,
    external_required: bool,
    topic_id: &str,
    url: &str,
    now: DateTime<Utc>,
) -> SeoReport {
    let content = content_checks(draft, cfg, external_required);
    let headline = headline_checks(&draft.title, &draft.focus_keyphrase);

    let content_score = score_from_checks(&content);
    let headline_score = score_from_checks(&headline);

    let musts_hold = content
        .iter()
        .filter(|c| MUST_RULES.contains(&c.key.as_str()))
        .all(|c| c.passed);

    let pass = musts_hold
        && content_score >= cfg.seo.min_content_score
        && headline_score >= cfg.seo.min_headline_score;

    let mut checks = content;
    checks.extend(headline);

    SeoReport {
        topic_id: topic_id.to_string(),
        url: url.to_string(),
        content_score,
        headline_score,
        checks,
        verdict: if pass { SeoVerdict::Pass } else { SeoVerdict::Fail },
        created_at: now,
    }
}
