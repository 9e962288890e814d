//! Syntactic link cleanup and enrichment applied to a generated body
//! before the SEO gate. Purely local: no link target is ever fetched, so
//! the gate's verdict stays a function of its inputs.
use crate::html::{self, Anchor};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Internal,
    External,
    /// Fragment, mailto:, tel:, or empty — dropped during cleanup.
    Skip,
}

/// Classify an href against the site domain. Relative links count as
/// internal; subdomains of the site count as internal.
pub fn classify(href: &str, site_domain: &str) -> LinkKind {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("tel:") {
        return LinkKind::Skip;
    }
    if href.starts_with('/') {
        return LinkKind::Internal;
    }
    let domain = html::domain_of(href);
    if domain.is_empty() {
        // Relative path like "recursos/guia".
        return LinkKind::Internal;
    }
    let site = site_domain.trim().to_lowercase();
    if !site.is_empty() && (domain == site || domain.ends_with(&format!(".{site}"))) {
        LinkKind::Internal
    } else {
        LinkKind::External
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub internal: usize,
    pub external: usize,
    pub removed: usize,
}

/// Count internal/external anchors in a body without modifying it.
pub fn count_links(body: &str, site_domain: &str) -> LinkStats {
    let mut stats = LinkStats::default();
    for anchor in html::anchors(body) {
        match classify(&anchor.href, site_domain) {
            LinkKind::Internal => stats.internal += 1,
            LinkKind::External => stats.external += 1,
            LinkKind::Skip => {}
        }
    }
    stats
}

/// Whether this publication is one the external-link rotation applies to.
pub fn external_link_required(publication_count: i64, interval: u32) -> bool {
    interval > 0 && publication_count % interval as i64 == 0
}

fn link_label(url: &str) -> String {
    let path = reqwest::Url::parse(url)
        .map(|u| u.path().trim_matches('/').to_string())
        .unwrap_or_default();
    if path.is_empty() {
        return "Portal principal".to_string();
    }
    let words = path.replace(['-', '_', '/'], " ");
    let label: String = words
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    label.chars().take(80).collect()
}

fn internal_resources_section(links: &[String]) -> String {
    let items: Vec<String> = links
        .iter()
        .filter(|u| !u.trim().is_empty())
        .take(3)
        .map(|u| format!("<li><a href=\"{}\">{}</a></li>", u.trim(), link_label(u.trim())))
        .collect();
    if items.is_empty() {
        return String::new();
    }
    format!(
        "\n<h2>Recursos internos recomendados</h2>\n<ul>\n{}\n</ul>\n",
        items.join("\n")
    )
}

fn source_attribution_section(source_url: &str) -> String {
    let domain = html::domain_of(source_url);
    let label = if domain.is_empty() {
        source_url.to_string()
    } else {
        domain.trim_start_matches("www.").to_string()
    };
    format!(
        "\n<h2>Fuente consultada</h2>\n<p><a href=\"{source_url}\">{label}</a></p>\n"
    )
}

/// Clean the body's anchors and guarantee the link structure the SEO gate
/// checks for: dead-weight anchors are unwrapped to their text, an
/// internal-resources section is appended when no internal link survived,
/// and a source attribution is appended when the external-link rotation
/// requires one and none is present.
pub fn cleanup_and_enrich(
    body: &str,
    site_domain: &str,
    internal_links: &[String],
    source_url: Option<&str>,
    external_required: bool,
) -> (String, LinkStats) {
    let mut cleaned = body.to_string();
    let mut stats = LinkStats::default();

    for anchor in html::anchors(body) {
        match classify(&anchor.href, site_domain) {
            LinkKind::Skip => {
                let Anchor { raw, label, .. } = anchor;
                cleaned = cleaned.replacen(&raw, &label, 1);
                stats.removed += 1;
            }
            LinkKind::Internal => stats.internal += 1,
            LinkKind::External => stats.external += 1,
        }
    }

    if stats.internal == 0 {
        let section = internal_resources_section(internal_links);
        if !section.is_empty() {
            stats.internal += internal_links.iter().filter(|u| !u.trim().is_empty()).take(3).count();
            cleaned = format!("{}{}", cleaned.trim_end(), section);
        }
    }

    if external_required && stats.external == 0 {
        if let Some(source_url) = source_url.filter(|u| html::is_public_http_url(u)) {
            cleaned = format!("{}{}", cleaned.trim_end(), source_attribution_section(source_url));
            stats.external += 1;
        }
    }

    debug!(?stats, "link cleanup complete");
    (cleaned, stats)
}
