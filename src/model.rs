use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome recorded for a processed URL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProcessedStatus {
    Processed,
    GenFailed,
    WpFailed,
    SeoFailed,
    SkippedDuplicate,
}

impl ProcessedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessedStatus::Processed => "processed",
            ProcessedStatus::GenFailed => "gen_failed",
            ProcessedStatus::WpFailed => "wp_failed",
            ProcessedStatus::SeoFailed => "seo_failed",
            ProcessedStatus::SkippedDuplicate => "skipped_duplicate",
        }
    }
}

/// SEO gate verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SeoVerdict {
    Pass,
    Fail,
}

impl SeoVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeoVerdict::Pass => "pass",
            SeoVerdict::Fail => "fail",
        }
    }
}

/// A search hit normalized into a drafting candidate. Run-scoped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_domain: String,
    pub topic_id: String,
}

/// A candidate with its relevance evaluation attached. In-memory only.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub candidate: Candidate,
    pub usability_score: f64,
    pub is_evergreen: bool,
    pub rejection_reason: Option<&'static str>,
}

/// Source article text fetched for generation context. Best-effort.
#[derive(Debug, Clone, Default)]
pub struct SourceText {
    pub text: String,
    pub published_at: String,
    pub author: String,
}

/// A generated article awaiting the SEO gate and CMS submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub title: String,
    pub body_html: String,
    pub excerpt: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub seo_title: String,
    pub seo_description: String,
    pub focus_keyphrase: String,
    pub social_title: String,
    pub social_description: String,
    pub image_prompt: String,
    pub image_alt_text: String,
    pub cover_image_ref: Option<String>,
}

/// One boolean SEO rule outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeoCheck {
    pub key: String,
    pub passed: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Persisted record of one SEO gate evaluation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeoReport {
    pub topic_id: String,
    pub url: String,
    pub content_score: u32,
    pub headline_score: u32,
    pub checks: Vec<SeoCheck>,
    pub verdict: SeoVerdict,
    pub created_at: DateTime<Utc>,
}

impl SeoReport {
    pub fn check(&self, key: &str) -> Option<bool> {
        self.checks.iter().find(|c| c.key == key).map(|c| c.passed)
    }
}

/// Draft created in the CMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedDraft {
    pub id: i64,
    pub edit_url: String,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub published: u32,
    pub rejected: u32,
    pub skipped: u32,
    pub cadence_skipped: bool,
}
