//! Gemini API client backing the text-evaluation, generation, and cover
//! image collaborators.
use crate::config::Gemini;
use crate::content::{strip_code_fences, ContentGenerator};
use crate::imaging::CoverImageGenerator;
use crate::scorer::{Evaluation, TextEvaluator};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/";

/// Weights applied to the evaluation components when collapsing them into
/// a single usability score.
const W_RELEVANCE: f64 = 0.35;
const W_EDUCATIONAL: f64 = 0.25;
const W_RECENCY: f64 = 0.40;

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    text_model: String,
    image_model: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
struct EvaluationPayload {
    #[serde(default)]
    relevancia: f64,
    #[serde(default)]
    valor_educativo: f64,
    #[serde(default)]
    actualidad: f64,
    #[serde(default)]
    justificacion: String,
}

impl GeminiClient {
    pub fn from_config(cfg: &Gemini) -> Self {
        let base_url = Url::parse(GEMINI_API_BASE).expect("valid default Gemini URL");
        Self::with_base_url(cfg, base_url)
    }

    pub fn with_base_url(cfg: &Gemini, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("wp-draftbot/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
            text_model: cfg.text_model.clone(),
            image_model: cfg.image_model.clone(),
        }
    }

    pub fn build_request(&self, model: &str, body: &Value) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("v1beta/models/{model}:generateContent"))
            .context("invalid Gemini base URL")?;
        self.http
            .post(endpoint)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build Gemini request")
    }

    async fn execute(&self, model: &str, body: Value) -> Result<GenerateContentResponse> {
        let request = self.build_request(model, &body)?;
        debug!(url=%request.url(), "sending Gemini request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Gemini")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from Gemini: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini error {}: {}", status, body));
        }
        res.json().await.context("invalid Gemini response")
    }

    fn first_text(response: GenerateContentResponse) -> Result<String> {
        let text: String = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();
        if text.trim().is_empty() {
            return Err(anyhow!("Gemini returned no text"));
        }
        Ok(text)
    }

    fn first_image(response: GenerateContentResponse) -> Result<Vec<u8>> {
        let data = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.inline_data)
            .map(|d| d.data)
            .find(|d| !d.is_empty())
            .ok_or_else(|| anyhow!("Gemini returned no image data"))?;
        BASE64.decode(data).context("invalid base64 image payload")
    }

    async fn generate_json_text(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" },
        });
        let response = self.execute(&self.text_model, body).await?;
        Self::first_text(response)
    }
}

fn parse_evaluation(raw: &str) -> Result<Evaluation> {
    let payload: EvaluationPayload =
        serde_json::from_str(&strip_code_fences(raw)).context("invalid evaluation payload")?;
    let score = payload.relevancia * W_RELEVANCE
        + payload.valor_educativo * W_EDUCATIONAL
        + payload.actualidad * W_RECENCY;
    Ok(Evaluation {
        score: score.clamp(0.0, 100.0),
        rationale: {
            let r = payload.justificacion.trim();
            (!r.is_empty()).then(|| r.to_string())
        },
    })
}

#[async_trait]
impl TextEvaluator for GeminiClient {
    async fn score(&self, prompt: &str) -> Result<Evaluation> {
        let raw = self.generate_json_text(prompt).await?;
        parse_evaluation(&raw)
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_json_text(prompt).await
    }
}

#[async_trait]
impl CoverImageGenerator for GeminiClient {
    async fn generate_cover(&self, prompt: &str) -> Result<Vec<u8>> {
        let full_prompt = format!(
            "{prompt} Style: professional editorial photography, warm lighting, \
             clean composition, suitable for a blog header. No text overlay. \
             High quality. 16:9 aspect ratio."
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": full_prompt }] }],
        });
        let response = self.execute(&self.image_model, body).await?;
        Self::first_image(response)
    }
}
