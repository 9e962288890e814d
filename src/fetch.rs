//! Best-effort retrieval of the source article's full text, used to enrich
//! the generation context. Every failure here degrades to snippet-only
//! generation; nothing in the pipeline depends on it succeeding.
use crate::html;
use crate::model::SourceText;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; wp-draftbot/0.1)";

static ARTICLE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<article\b[^>]*>(.*?)</article>").unwrap());
static MAIN_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<main\b[^>]*>(.*?)</main>").unwrap());
static BODY_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<body\b[^>]*>(.*?)</body>").unwrap());
static META_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());
static META_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:property|name)\s*=\s*["']([^"']+)["']"#).unwrap()
});
static META_CONTENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)content\s*=\s*["']([^"']*)["']"#).unwrap());

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str, max_chars: usize) -> Result<SourceText>;
}

#[derive(Debug, Clone)]
pub struct HttpSourceFetcher {
    http: reqwest::Client,
}

impl HttpSourceFetcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(25))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

impl Default for HttpSourceFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefer semantic article/main containers before the body fallback.
fn extract_article_text(page: &str, max_chars: usize) -> String {
    let fragment = ARTICLE_BLOCK
        .captures(page)
        .or_else(|| MAIN_BLOCK.captures(page))
        .or_else(|| BODY_BLOCK.captures(page))
        .map(|cap| cap[1].to_string())
        .unwrap_or_else(|| page.to_string());
    let text = html::strip_tags(&fragment);
    text.chars().take(max_chars).collect()
}

const DATE_META_KEYS: &[&str] = &[
    "article:published_time",
    "og:published_time",
    "pubdate",
    "publishdate",
    "date",
    "dc.date",
];
const AUTHOR_META_KEYS: &[&str] = &["author", "article:author"];

/// Pull published-time and author hints out of the page's meta tags.
fn extract_meta(page: &str) -> (String, String) {
    let mut published_at = String::new();
    let mut author = String::new();

    for tag in META_TAGS.find_iter(page) {
        let tag = tag.as_str();
        let Some(key) = META_KEY.captures(tag).map(|c| c[1].to_lowercase()) else {
            continue;
        };
        let Some(content) = META_CONTENT.captures(tag).map(|c| html::clean_spaces(&c[1]))
        else {
            continue;
        };
        if content.is_empty() {
            continue;
        }
        if published_at.is_empty() && DATE_META_KEYS.contains(&key.as_str()) {
            published_at = content.chars().take(80).collect();
        } else if author.is_empty() && AUTHOR_META_KEYS.contains(&key.as_str()) {
            author = content.chars().take(120).collect();
        }
        if !published_at.is_empty() && !author.is_empty() {
            break;
        }
    }
    (published_at, author)
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch_text(&self, url: &str, max_chars: usize) -> Result<SourceText> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch source {url}"))?;
        if !res.status().is_success() {
            return Err(anyhow!("source fetch {} returned {}", url, res.status()));
        }

        let content_type = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        if !content_type.contains("html") {
            return Err(anyhow!("source {} is not HTML ({})", url, content_type));
        }

        let page = res.text().await.context("failed to read source body")?;
        let text = extract_article_text(&page, max_chars);
        if text.is_empty() {
            return Err(anyhow!("no article text extracted from {url}"));
        }
        let (published_at, author) = extract_meta(&page);
        debug!(url, chars = text.len(), "source text extracted");
        Ok(SourceText {
            text,
            published_at,
            author,
        })
    }
}
