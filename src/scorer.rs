//! Relevance scoring: asks the text-evaluation collaborator for a
//! usability score, then applies local anti-evergreen heuristics.
use crate::config::Scoring;
use crate::model::{Candidate, ScoredItem};
use crate::topics::Topic;
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

/// Outcome of one external evaluation call, on the 0-100 scale.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub rationale: Option<String>,
}

#[async_trait]
pub trait TextEvaluator: Send + Sync {
    async fn score(&self, prompt: &str) -> Result<Evaluation>;
}

static YEAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b20\d{2}\b").unwrap());

const EVERGREEN_TEXT_HINTS: &[&str] = &[
    "wikipedia", "wiki", "what is", "qué es", "que es", "about", "acerca", "faq",
    "home", "inicio", "history", "historia", "method", "método", "metodo",
];
const EVERGREEN_PATH_HINTS: &[&str] = &[
    "/about", "/acerca", "/faq", "/what-is", "/home", "/inicio", "/wiki",
];

/// Build the evaluation prompt. The collaborator is expected to answer with
/// a JSON object carrying relevance/educational-value/recency components;
/// the topic's scoring guidance is forwarded verbatim.
pub fn build_scoring_prompt(topic: &Topic, candidate: &Candidate) -> String {
    format!(
        "Eres un evaluador experto para el vertical \"{name}\".\n\
         \n\
         Evalúa el siguiente artículo/noticia y devuelve un JSON con exactamente estos campos:\n\
         - relevancia: número 0-100 (relevancia para la audiencia del vertical)\n\
         - valor_educativo: número 0-100 (valor educativo del contenido)\n\
         - actualidad: número 0-100 (qué tan actual y novedoso es; penaliza contenido evergreen)\n\
         - justificacion: string breve explicando tu evaluación\n\
         \n\
         Reglas clave:\n\
         - Da prioridad a contenido reciente, con hechos concretos, fechas o eventos.\n\
         - Penaliza homepages, páginas \"about\", FAQs, directorios y contenido enciclopédico.\n\
         {guidance}\n\
         \n\
         Artículo:\n\
         Título: {title}\n\
         URL: {url}\n\
         Fragmento: {snippet}\n\
         \n\
         Responde SOLO con el JSON, sin markdown ni texto adicional.",
        name = topic.name,
        guidance = topic.scoring_guidance,
        title = candidate.title,
        url = candidate.url,
        snippet = candidate.snippet,
    )
}

fn has_recency_signal(candidate: &Candidate) -> bool {
    if candidate.published_at.is_some() {
        return true;
    }
    let text = format!("{} {}", candidate.title, candidate.snippet);
    YEAR_TOKEN.is_match(&text)
}

/// Evergreen detection: home/about/wiki-style pages and items with no
/// recency signal at all. Flagged pages are penalized, never hard-rejected.
pub fn is_evergreen(candidate: &Candidate) -> bool {
    let url = candidate.url.to_lowercase();
    let title = candidate.title.to_lowercase();

    if candidate.source_domain.ends_with("wikipedia.org") {
        return true;
    }
    if EVERGREEN_TEXT_HINTS
        .iter()
        .any(|h| title.contains(h))
    {
        return true;
    }
    if EVERGREEN_PATH_HINTS.iter().any(|h| url.contains(h)) {
        return true;
    }
    if let Ok(parsed) = reqwest::Url::parse(&candidate.url) {
        if parsed.path() == "/" || parsed.path().is_empty() {
            return true;
        }
    }
    !has_recency_signal(candidate)
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Effective acceptance bar for a topic.
pub fn threshold(topic: &Topic, cfg: &Scoring) -> f64 {
    topic.min_score.max(cfg.min_usability_score)
}

/// Score a single candidate. Evergreen items get the configured margin
/// subtracted before the threshold comparison, which stays the single
/// source of truth for acceptance.
pub async fn score_candidate(
    evaluator: &dyn TextEvaluator,
    topic: &Topic,
    candidate: &Candidate,
    cfg: &Scoring,
) -> Result<ScoredItem> {
    let prompt = build_scoring_prompt(topic, candidate);
    let evaluation = evaluator.score(&prompt).await?;

    let evergreen = is_evergreen(candidate);
    let mut score = clamp_score(evaluation.score);
    if evergreen {
        score = clamp_score(score - cfg.evergreen_penalty);
    }

    let bar = threshold(topic, cfg);
    let rejection_reason = (score < bar).then_some("low_score");

    info!(
        topic = %topic.id,
        url = %candidate.url,
        score,
        evergreen,
        bar,
        rationale = evaluation.rationale.as_deref().unwrap_or(""),
        "scored candidate"
    );

    Ok(ScoredItem {
        candidate: candidate.clone(),
        usability_score: score,
        is_evergreen: evergreen,
        rejection_reason,
    })
}

/// Evaluate candidates in collector order and return the first one clearing
/// the bar together with its index in the slice; no full ranking is
/// performed. An evaluator failure skips that candidate only.
pub async fn select_first(
    evaluator: &dyn TextEvaluator,
    topic: &Topic,
    candidates: &[Candidate],
    cfg: &Scoring,
) -> Result<Option<(usize, ScoredItem)>> {
    for (index, candidate) in candidates.iter().enumerate() {
        let item = match score_candidate(evaluator, topic, candidate, cfg).await {
            Ok(item) => item,
            Err(err) => {
                warn!(?err, url = %candidate.url, "scoring failed; skipping candidate");
                continue;
            }
        };
        if item.rejection_reason.is_none() {
            return Ok(Some((index, item)));
        }
        info!(
            url = %candidate.url,
            score = item.usability_score,
            "discarded (below threshold)"
        );
    }
    Ok(None)
}
