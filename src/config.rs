//! Configuration loader and validator for the news-draft pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub search: Search,
    pub scoring: Scoring,
    pub gemini: Gemini,
    pub content: Content,
    pub seo: Seo,
    pub wordpress: WordPress,
    pub image: ImageSettings,
    #[serde(default)]
    pub notify: Notify,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub data_dir: String,
    pub topics_file: String,
    pub max_posts_per_run: u32,
    pub publish_interval_days: i64,
}

/// Search provider settings (Brave web search).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Search {
    pub api_key: String,
    pub count: u32,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub lang: String,
    /// Freshness window passed to the provider, e.g. "pw" for past week.
    #[serde(default)]
    pub freshness: String,
    #[serde(default)]
    pub excluded_domains: Vec<String>,
    #[serde(default)]
    pub blocked_source_terms: Vec<String>,
}

/// Relevance scoring thresholds (0-100 scale).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scoring {
    pub min_usability_score: f64,
    pub evergreen_penalty: f64,
}

/// Gemini API settings shared by the text and image collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gemini {
    pub api_key: String,
    pub text_model: String,
    pub image_model: String,
}

/// Content generation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub min_body_words: usize,
    pub source_fetch_enabled: bool,
    pub source_fetch_max_chars: usize,
    pub title_max_len: usize,
    pub excerpt_max_len: usize,
    pub max_tags: usize,
    #[serde(default)]
    pub blocked_terms: Vec<String>,
}

/// SEO gate thresholds and length limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Seo {
    pub min_content_score: u32,
    pub min_headline_score: u32,
    pub seo_title_max_len: usize,
    pub seo_description_max_len: usize,
    pub social_title_max_len: usize,
    pub social_description_max_len: usize,
    /// Strict substring keyphrase matching; token-overlap match when false.
    pub strict_keyphrase: bool,
    /// Require an external link on every Nth publication; 0 disables.
    pub external_link_interval: u32,
}

/// WordPress REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordPress {
    pub site_url: String,
    pub username: String,
    pub app_password: String,
    #[serde(default)]
    pub site_title: String,
    #[serde(default)]
    pub title_separator: String,
    #[serde(default)]
    pub internal_links: Vec<String>,
}

/// Cover image generation and re-encode settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSettings {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
    pub max_bytes: u64,
}

/// Optional draft notification channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Notify {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_id: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)?;
        fs::create_dir_all(Path::new(&self.app.data_dir).join("images"))
    }

    /// Host part of the WordPress site URL, used to classify links.
    pub fn site_domain(&self) -> String {
        reqwest::Url::parse(&self.wordpress.site_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_default()
            .to_lowercase()
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.topics_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.topics_file must be non-empty"));
    }
    if cfg.app.max_posts_per_run == 0 {
        return Err(ConfigError::Invalid("app.max_posts_per_run must be > 0"));
    }
    if cfg.app.publish_interval_days < 0 {
        return Err(ConfigError::Invalid(
            "app.publish_interval_days must be >= 0",
        ));
    }

    if cfg.search.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("search.api_key must be non-empty"));
    }
    if cfg.search.count == 0 {
        return Err(ConfigError::Invalid("search.count must be > 0"));
    }

    if !(0.0..=100.0).contains(&cfg.scoring.min_usability_score) {
        return Err(ConfigError::Invalid(
            "scoring.min_usability_score must be within 0-100",
        ));
    }
    if !(0.0..=100.0).contains(&cfg.scoring.evergreen_penalty) {
        return Err(ConfigError::Invalid(
            "scoring.evergreen_penalty must be within 0-100",
        ));
    }

    if cfg.gemini.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("gemini.api_key must be non-empty"));
    }
    if cfg.gemini.text_model.trim().is_empty() {
        return Err(ConfigError::Invalid("gemini.text_model must be non-empty"));
    }

    if cfg.content.min_body_words == 0 {
        return Err(ConfigError::Invalid("content.min_body_words must be > 0"));
    }
    if cfg.content.source_fetch_enabled && cfg.content.source_fetch_max_chars == 0 {
        return Err(ConfigError::Invalid(
            "content.source_fetch_max_chars must be > 0 when source fetch is enabled",
        ));
    }

    if cfg.seo.min_content_score > 100 || cfg.seo.min_headline_score > 100 {
        return Err(ConfigError::Invalid(
            "seo score thresholds must be within 0-100",
        ));
    }
    if cfg.seo.seo_title_max_len == 0 || cfg.seo.seo_description_max_len == 0 {
        return Err(ConfigError::Invalid("seo length limits must be > 0"));
    }

    if cfg.wordpress.site_url.trim().is_empty() {
        return Err(ConfigError::Invalid("wordpress.site_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.wordpress.site_url).is_err() {
        return Err(ConfigError::Invalid("wordpress.site_url must be a valid URL"));
    }
    if cfg.wordpress.username.trim().is_empty() {
        return Err(ConfigError::Invalid("wordpress.username must be non-empty"));
    }
    if cfg.wordpress.app_password.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "wordpress.app_password must be non-empty",
        ));
    }

    if cfg.image.enabled {
        if cfg.image.width == 0 || cfg.image.height == 0 {
            return Err(ConfigError::Invalid("image.width/height must be > 0"));
        }
        if !(1..=100).contains(&cfg.image.quality) {
            return Err(ConfigError::Invalid("image.quality must be within 1-100"));
        }
    }

    Ok(())
}

/// Example YAML used by unit tests and as a starting point for deployments.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  topics_file: "topics.yaml"
  max_posts_per_run: 1
  publish_interval_days: 0

search:
  api_key: "YOUR_BRAVE_SEARCH_API_KEY"
  count: 20
  country: "mx"
  lang: "es"
  freshness: "pw"
  excluded_domains:
    - "montessorimexico.org"
  blocked_source_terms: []

scoring:
  min_usability_score: 60.0
  evergreen_penalty: 15.0

gemini:
  api_key: "YOUR_GEMINI_API_KEY"
  text_model: "gemini-2.5-flash"
  image_model: "gemini-2.5-flash-image"

content:
  min_body_words: 500
  source_fetch_enabled: true
  source_fetch_max_chars: 6000
  title_max_len: 70
  excerpt_max_len: 160
  max_tags: 8
  blocked_terms: []

seo:
  min_content_score: 80
  min_headline_score: 60
  seo_title_max_len: 60
  seo_description_max_len: 155
  social_title_max_len: 60
  social_description_max_len: 155
  strict_keyphrase: true
  external_link_interval: 3

wordpress:
  site_url: "https://example.org"
  username: "bot"
  app_password: "YOUR_WP_APP_PASSWORD"
  site_title: "Noticias Montessori"
  title_separator: "|"
  internal_links:
    - "https://example.org/blog"
    - "https://example.org/recursos"

image:
  enabled: true
  width: 1200
  height: 630
  quality: 90
  max_bytes: 400000

notify:
  webhook_url: ""
  telegram_bot_token: ""
  telegram_chat_id: ""
"#
}
