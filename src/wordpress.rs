//! WordPress REST API client: resolves taxonomy terms and authors,
//! uploads media, and creates draft posts with their SEO metadata.
use crate::config::WordPress;
use crate::html;
use crate::model::{CreatedDraft, Draft};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct MediaMeta {
    pub title: String,
    pub alt_text: String,
    pub caption: String,
    pub description: String,
}

#[async_trait]
pub trait CmsClient: Send + Sync {
    /// Find a taxonomy term by name (case-insensitive) or create it.
    async fn resolve_or_create_term(&self, taxonomy: &str, name: &str) -> Result<i64>;
    /// Resolve a display name to a user id; `None` when nothing matches.
    async fn resolve_author(&self, name: &str) -> Result<Option<i64>>;
    /// Upload an image to the media library and set its metadata.
    async fn upload_media(&self, bytes: Vec<u8>, filename: &str, meta: &MediaMeta) -> Result<i64>;
    /// Create a draft post. Never publishes.
    async fn create_draft(
        &self,
        draft: &Draft,
        category_ids: &[i64],
        tag_ids: &[i64],
        author_id: Option<i64>,
        media_id: Option<i64>,
    ) -> Result<CreatedDraft>;
}

#[derive(Clone)]
pub struct WordPressClient {
    http: Client,
    site_url: Url,
    username: String,
    app_password: String,
}

impl fmt::Debug for WordPressClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordPressClient")
            .field("site_url", &self.site_url)
            .finish_non_exhaustive()
    }
}

/// Draft payload for `POST wp/v2/posts`.
pub fn build_draft_payload(
    draft: &Draft,
    category_ids: &[i64],
    tag_ids: &[i64],
    author_id: Option<i64>,
    media_id: Option<i64>,
) -> Value {
    let slug_source = if draft.seo_title.trim().is_empty() {
        &draft.title
    } else {
        &draft.seo_title
    };
    let excerpt = if draft.excerpt.trim().is_empty() {
        &draft.seo_description
    } else {
        &draft.excerpt
    };
    let mut payload = json!({
        "title": draft.title,
        "content": draft.body_html,
        "excerpt": excerpt,
        "status": "draft",
        "categories": category_ids,
        "tags": tag_ids,
        "slug": html::slugify(slug_source),
    });
    if let Some(media_id) = media_id {
        payload["featured_media"] = json!(media_id);
    }
    if let Some(author_id) = author_id {
        payload["author"] = json!(author_id);
    }
    payload
}

/// SEO metadata payload for the AIOSEO endpoint.
pub fn build_seo_payload(post_id: i64, draft: &Draft) -> Value {
    let mut keywords: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for kw in std::iter::once(&draft.focus_keyphrase).chain(draft.tags.iter()) {
        let kw = html::clean_spaces(kw);
        if kw.is_empty() || !seen.insert(kw.to_lowercase()) {
            continue;
        }
        keywords.push(kw);
        if keywords.len() >= 8 {
            break;
        }
    }
    json!({
        "id": post_id,
        "title": draft.seo_title,
        "description": draft.seo_description,
        "og_title": draft.social_title,
        "og_description": draft.social_description,
        "twitter_title": draft.social_title,
        "twitter_description": draft.social_description,
        "keywords": keywords.join(", "),
    })
}

/// Back-office edit link included in notifications.
pub fn edit_url_for(site_url: &Url, post_id: i64) -> String {
    format!(
        "{}/wp-admin/post.php?post={}&action=edit",
        site_url.as_str().trim_end_matches('/'),
        post_id
    )
}

impl WordPressClient {
    pub fn from_config(cfg: &WordPress) -> Result<Self> {
        let site_url = Url::parse(&cfg.site_url).context("invalid WordPress site URL")?;
        let http = Client::builder()
            .user_agent("wp-draftbot/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Ok(Self {
            http,
            site_url,
            username: cfg.username.clone(),
            app_password: cfg.app_password.clone(),
        })
    }

    fn api_url(&self, endpoint: &str) -> Result<Url> {
        self.site_url
            .join(&format!("wp-json/wp/v2/{endpoint}"))
            .context("invalid WordPress endpoint")
    }

    fn aioseo_url(&self, endpoint: &str) -> Result<Url> {
        self.site_url
            .join(&format!("wp-json/aioseo/v1/{endpoint}"))
            .context("invalid AIOSEO endpoint")
    }

    async fn execute_json(
        &self,
        method: reqwest::Method,
        url: Url,
        body: Option<&Value>,
        retry_on_500: bool,
    ) -> Result<Value> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .basic_auth(&self.username, Some(&self.app_password));
            if let Some(body) = body {
                request = request.json(body);
            }
            let res = request.send().await.context("failed to reach WordPress")?;

            if res.status() == StatusCode::UNAUTHORIZED {
                return Err(anyhow!("WordPress auth failed (401); check credentials"));
            }
            if res.status().is_server_error() && retry_on_500 && attempt == 1 {
                warn!(status = %res.status(), url = %url, "WordPress 5xx; retrying once in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
            if !res.status().is_success() {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                return Err(anyhow!("WordPress error {}: {}", status, body));
            }
            return res.json().await.context("invalid WordPress response");
        }
    }

    async fn sync_seo_metadata(&self, post_id: i64, draft: &Draft) {
        let payload = build_seo_payload(post_id, draft);
        let result = async {
            let url = self.aioseo_url("post")?;
            self.execute_json(reqwest::Method::POST, url, Some(&payload), false)
                .await
        }
        .await;
        match result {
            Ok(_) => debug!(post_id, "SEO metadata synced"),
            Err(err) => warn!(?err, post_id, "SEO metadata sync failed"),
        }
    }
}

fn id_from(value: &Value) -> Result<i64> {
    value
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| anyhow!("WordPress response missing id"))
}

#[async_trait]
impl CmsClient for WordPressClient {
    async fn resolve_or_create_term(&self, taxonomy: &str, name: &str) -> Result<i64> {
        let name = html::clean_spaces(name);
        if name.is_empty() {
            return Err(anyhow!("empty taxonomy term"));
        }

        let mut url = self.api_url(taxonomy)?;
        url.query_pairs_mut()
            .append_pair("search", &name)
            .append_pair("per_page", "100");
        let found = self
            .execute_json(reqwest::Method::GET, url, None, true)
            .await?;
        if let Some(terms) = found.as_array() {
            for term in terms {
                let term_name = term.get("name").and_then(Value::as_str).unwrap_or("");
                if term_name.eq_ignore_ascii_case(&name) {
                    return id_from(term);
                }
            }
        }

        let created = self
            .execute_json(
                reqwest::Method::POST,
                self.api_url(taxonomy)?,
                Some(&json!({ "name": name })),
                true,
            )
            .await?;
        let id = id_from(&created)?;
        info!(taxonomy, name = %name, id, "created taxonomy term");
        Ok(id)
    }

    async fn resolve_author(&self, name: &str) -> Result<Option<i64>> {
        let clean = html::clean_spaces(name);
        if clean.is_empty() {
            return Ok(None);
        }
        let key = html::normalize_for_compare(&clean);

        let mut url = self.api_url("users")?;
        url.query_pairs_mut()
            .append_pair("search", &clean)
            .append_pair("per_page", "100");
        let users = self
            .execute_json(reqwest::Method::GET, url, None, false)
            .await?;
        let Some(users) = users.as_array() else {
            return Ok(None);
        };

        let mut fallback = None;
        for user in users {
            let values = ["name", "slug", "username", "nickname"]
                .iter()
                .filter_map(|f| user.get(*f).and_then(Value::as_str))
                .map(html::normalize_for_compare)
                .collect::<Vec<_>>();
            if values.iter().any(|v| *v == key) {
                return Ok(Some(id_from(user)?));
            }
            if fallback.is_none() && values.iter().any(|v| v.contains(&key)) {
                fallback = Some(id_from(user)?);
            }
        }
        Ok(fallback)
    }

    async fn upload_media(&self, bytes: Vec<u8>, filename: &str, meta: &MediaMeta) -> Result<i64> {
        let mime = if filename.to_lowercase().ends_with(".png") {
            "image/png"
        } else {
            "image/jpeg"
        };
        let url = self.api_url("media")?;
        let res = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(&self.app_password))
            .header("Content-Type", mime)
            .header(
                "Content-Disposition",
                format!("attachment; filename=\"{filename}\""),
            )
            .body(bytes)
            .send()
            .await
            .context("failed to upload media")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("media upload failed {}: {}", status, body));
        }
        let payload: Value = res.json().await.context("invalid media response")?;
        let media_id = id_from(&payload)?;
        info!(media_id, filename, "media uploaded");

        // Metadata update is best-effort; the upload already succeeded.
        let meta_payload = json!({
            "title": html::truncate(&meta.title, 120, false),
            "alt_text": html::truncate(&meta.alt_text, 125, false),
            "caption": html::truncate(&meta.caption, 220, false),
            "description": html::truncate(&meta.description, 400, false),
        });
        if let Err(err) = self
            .execute_json(
                reqwest::Method::POST,
                self.api_url(&format!("media/{media_id}"))?,
                Some(&meta_payload),
                false,
            )
            .await
        {
            warn!(?err, media_id, "could not update media metadata");
        }
        Ok(media_id)
    }

    async fn create_draft(
        &self,
        draft: &Draft,
        category_ids: &[i64],
        tag_ids: &[i64],
        author_id: Option<i64>,
        media_id: Option<i64>,
    ) -> Result<CreatedDraft> {
        let payload = build_draft_payload(draft, category_ids, tag_ids, author_id, media_id);
        let created = self
            .execute_json(
                reqwest::Method::POST,
                self.api_url("posts")?,
                Some(&payload),
                true,
            )
            .await?;
        let id = id_from(&created)?;
        self.sync_seo_metadata(id, draft).await;
        info!(id, title = %draft.title, "draft created");
        Ok(CreatedDraft {
            id,
            edit_url: edit_url_for(&self.site_url, id),
        })
    }
}
