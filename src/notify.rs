//! Draft notifications (webhook + Telegram). Strictly best-effort: every
//! failure is logged and swallowed, never surfaced to the pipeline.
use crate::config::Notify;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// Details of a freshly created CMS draft.
#[derive(Debug, Clone, Default)]
pub struct DraftNotice {
    pub post_id: i64,
    pub title: String,
    pub topic_name: String,
    pub author: String,
    pub edit_url: String,
    pub content_score: u32,
    pub headline_score: u32,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fire-and-forget; implementations never return an error.
    async fn notify_draft_created(&self, notice: &DraftNotice);
}

pub fn build_message(notice: &DraftNotice) -> String {
    let author = if notice.author.is_empty() {
        "N/A"
    } else {
        &notice.author
    };
    format!(
        "Nuevo borrador generado\n\
         Título: {title}\n\
         Tema: {topic}\n\
         Autor: {author}\n\
         Post ID: {post_id}\n\
         SEO: contenido={content} | titular={headline}\n\
         Editar: {edit_url}",
        title = notice.title,
        topic = notice.topic_name,
        post_id = notice.post_id,
        content = notice.content_score,
        headline = notice.headline_score,
        edit_url = notice.edit_url,
    )
}

#[derive(Debug, Clone)]
pub struct HttpNotifier {
    http: reqwest::Client,
    cfg: Notify,
}

impl HttpNotifier {
    pub fn from_config(cfg: &Notify) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("wp-draftbot/0.1")
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client");
        Self {
            http,
            cfg: cfg.clone(),
        }
    }

    async fn send_webhook(&self, message: &str, notice: &DraftNotice) -> bool {
        if self.cfg.webhook_url.trim().is_empty() {
            return false;
        }
        let payload = json!({
            "text": message,
            "event": "draft_created",
            "post_id": notice.post_id,
            "title": notice.title,
            "topic_name": notice.topic_name,
            "author": notice.author,
            "edit_url": notice.edit_url,
            "content_score": notice.content_score,
            "headline_score": notice.headline_score,
        });
        let result = async {
            let res = self
                .http
                .post(&self.cfg.webhook_url)
                .json(&payload)
                .send()
                .await?;
            res.error_for_status()
        }
        .await;
        match result {
            Ok(_) => {
                info!("webhook notification sent");
                true
            }
            Err(err) => {
                warn!(?err, "webhook notification failed");
                false
            }
        }
    }

    async fn send_telegram(&self, message: &str) -> bool {
        if self.cfg.telegram_bot_token.trim().is_empty()
            || self.cfg.telegram_chat_id.trim().is_empty()
        {
            return false;
        }
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.cfg.telegram_bot_token
        );
        let result = async {
            let res = self
                .http
                .post(&url)
                .json(&json!({
                    "chat_id": self.cfg.telegram_chat_id,
                    "text": message,
                    "disable_web_page_preview": true,
                }))
                .send()
                .await?;
            res.error_for_status()
        }
        .await;
        match result {
            Ok(_) => {
                info!("telegram notification sent");
                true
            }
            Err(err) => {
                warn!(?err, "telegram notification failed");
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify_draft_created(&self, notice: &DraftNotice) {
        let message = build_message(notice);
        let mut sent = self.send_webhook(&message, notice).await;
        sent = self.send_telegram(&message).await || sent;
        if !sent {
            info!(
                "draft created, but no notification channel is configured \
                 (set notify.webhook_url or telegram credentials)"
            );
        }
    }
}
