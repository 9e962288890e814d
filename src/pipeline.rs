//! Publication orchestrator: the per-topic state machine tying collection,
//! scoring, generation, the SEO gate, and publication together.
//!
//! Items move through `collected → scored → generated → seo_checked →
//! published | rejected`. Every per-candidate failure is converted into a
//! terminal status here and processing continues; only configuration errors
//! abort a run, before any state is touched.
use crate::config::Config;
use crate::content::{self, ContentGenerator, GenerationError};
use crate::db::{self, Pool};
use crate::fetch::SourceFetcher;
use crate::html;
use crate::imaging::{self, CoverImageGenerator};
use crate::links;
use crate::model::{
    CreatedDraft, Draft, ProcessedStatus, RunSummary, ScoredItem, SeoVerdict, SourceText,
};
use crate::notify::{DraftNotice, Notifier};
use crate::scorer::{self, TextEvaluator};
use crate::search::{self, SearchClient};
use crate::seo;
use crate::topics::Topic;
use crate::wordpress::{CmsClient, MediaMeta};
use anyhow::Result;
use chrono::{Duration, Utc};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Stage failures, each mapping to one terminal status.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("candidate collection failed: {0}")]
    Collection(#[source] anyhow::Error),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("SEO gate rejected the draft (content={content_score}, headline={headline_score})")]
    SeoRejected {
        content_score: u32,
        headline_score: u32,
    },
    #[error("CMS publish failed: {0}")]
    Publish(#[source] anyhow::Error),
    #[error("state store failure: {0}")]
    StateStore(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Full pipeline including CMS publication and state updates.
    Publish,
    /// Run everything up to the SEO gate, then stop: no CMS draft, no
    /// processed-URL mark, no cadence update. Reports are still persisted.
    Simulate,
}

/// External collaborators, bundled so the run signature stays stable.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn SearchClient>,
    pub evaluator: Arc<dyn TextEvaluator>,
    pub generator: Arc<dyn ContentGenerator>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub image: Option<Arc<dyn CoverImageGenerator>>,
    pub cms: Arc<dyn CmsClient>,
    pub notifier: Arc<dyn Notifier>,
}

enum CandidateOutcome {
    Published(CreatedDraft),
    Simulated,
}

/// Execute one pipeline run over the given topics.
#[instrument(skip_all)]
pub async fn run(
    pool: &Pool,
    cfg: &Config,
    topics: &[Topic],
    deps: &Collaborators,
    mode: RunMode,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    if cadence_locked(pool, cfg).await {
        summary.cadence_skipped = true;
        info!(
            interval_days = cfg.app.publish_interval_days,
            "cadence lock active; skipping drafting this run"
        );
        return Ok(summary);
    }

    let ordered = order_by_cadence(pool, topics).await;
    for topic in ordered {
        if summary.published >= cfg.app.max_posts_per_run {
            info!(cap = cfg.app.max_posts_per_run, "per-run post cap reached");
            break;
        }
        run_topic(pool, cfg, deps, topic, mode, &mut summary).await;
    }

    info!(
        published = summary.published,
        rejected = summary.rejected,
        skipped = summary.skipped,
        cadence_skipped = summary.cadence_skipped,
        "run complete"
    );
    Ok(summary)
}

/// Global cadence lock: true when the most recent publish across all
/// topics falls within the configured window.
async fn cadence_locked(pool: &Pool, cfg: &Config) -> bool {
    if cfg.app.publish_interval_days <= 0 {
        return false;
    }
    let last = match db::last_published(pool, None).await {
        Ok(last) => last,
        Err(err) => {
            warn!(?err, "could not read cadence marker; proceeding");
            return false;
        }
    };
    match last {
        Some(last) => Utc::now() - last < Duration::days(cfg.app.publish_interval_days),
        None => false,
    }
}

/// Rotation order: the topic with the least recent publish goes first;
/// never-published topics lead, keeping their configured order.
async fn order_by_cadence<'a>(pool: &Pool, topics: &'a [Topic]) -> Vec<&'a Topic> {
    let mut keyed = Vec::with_capacity(topics.len());
    for topic in topics {
        let last = match db::last_published(pool, Some(&topic.id)).await {
            Ok(last) => last,
            Err(err) => {
                warn!(?err, topic = %topic.id, "could not read topic cadence; treating as never published");
                None
            }
        };
        keyed.push((last, topic));
    }
    keyed.sort_by_key(|(last, _)| *last);
    keyed.into_iter().map(|(_, t)| t).collect()
}

/// Process a single topic until it publishes once or exhausts its
/// candidates. All stage failures are absorbed here.
async fn run_topic(
    pool: &Pool,
    cfg: &Config,
    deps: &Collaborators,
    topic: &Topic,
    mode: RunMode,
    summary: &mut RunSummary,
) {
    info!(topic = %topic.id, "processing topic");

    let candidates = match search::collect_candidates(pool, &*deps.search, topic, &cfg.search).await
    {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(
                err = %StageError::Collection(err),
                topic = %topic.id,
                "collection failed; skipping topic"
            );
            return;
        }
    };
    if candidates.is_empty() {
        info!(topic = %topic.id, "no new candidates");
        return;
    }

    let mut start = 0;
    while start < candidates.len() {
        let selected = match scorer::select_first(
            &*deps.evaluator,
            topic,
            &candidates[start..],
            &cfg.scoring,
        )
        .await
        {
            Ok(selected) => selected,
            Err(err) => {
                warn!(?err, topic = %topic.id, "scoring pass failed; skipping topic");
                return;
            }
        };

        let Some((offset, item)) = selected else {
            // Remaining candidates were all evaluated and fell below the bar.
            summary.skipped += (candidates.len() - start) as u32;
            info!(topic = %topic.id, "candidate list exhausted without a selection");
            return;
        };
        summary.skipped += offset as u32;
        start += offset + 1;

        let url = item.candidate.url.clone();
        let title = item.candidate.title.clone();
        let score = item.usability_score;

        match draft_and_publish(pool, cfg, deps, topic, &item, mode).await {
            Ok(CandidateOutcome::Published(created)) => {
                summary.published += 1;
                info!(
                    topic = %topic.id,
                    post_id = created.id,
                    edit_url = %created.edit_url,
                    "draft published; topic quota consumed"
                );
                return;
            }
            Ok(CandidateOutcome::Simulated) => {
                summary.published += 1;
                info!(topic = %topic.id, url = %url, "simulate: draft passed all gates");
                return;
            }
            Err(err) => {
                summary.rejected += 1;
                let status = match &err {
                    StageError::Generation(_) => Some(ProcessedStatus::GenFailed),
                    StageError::SeoRejected { .. } => Some(ProcessedStatus::SeoFailed),
                    StageError::Publish(_) => Some(ProcessedStatus::WpFailed),
                    StageError::Collection(_) | StageError::StateStore(_) => None,
                };
                warn!(err = %err, topic = %topic.id, url = %url, "candidate failed; moving on");
                if let Some(status) = status {
                    mark(pool, &url, &topic.id, &title, score, status).await;
                }
            }
        }
    }
}

/// Record a terminal status, absorbing state-store failures: a store error
/// is fatal to the current item only, never to the run.
async fn mark(
    pool: &Pool,
    url: &str,
    topic_id: &str,
    title: &str,
    score: f64,
    status: ProcessedStatus,
) {
    match db::mark_processed(pool, url, topic_id, title, score, status).await {
        Ok(true) => {}
        Ok(false) => info!(url, status = status.as_str(), "url already recorded; mark ignored"),
        Err(err) => warn!(?err, url, "could not record terminal status"),
    }
}

/// Advance one selected candidate through generation, the SEO gate, and
/// (in publish mode) the CMS.
async fn draft_and_publish(
    pool: &Pool,
    cfg: &Config,
    deps: &Collaborators,
    topic: &Topic,
    item: &ScoredItem,
    mode: RunMode,
) -> Result<CandidateOutcome, StageError> {
    let candidate = &item.candidate;

    // Defensive recheck; a duplicate at this point is recorded, not retried.
    match db::has_processed(pool, &candidate.url).await {
        Ok(true) => {
            mark(
                pool,
                &candidate.url,
                &topic.id,
                &candidate.title,
                item.usability_score,
                ProcessedStatus::SkippedDuplicate,
            )
            .await;
            return Err(StageError::StateStore(anyhow::anyhow!(
                "url already processed: {}",
                candidate.url
            )));
        }
        Ok(false) => {}
        Err(err) => return Err(StageError::StateStore(err)),
    }

    let source = fetch_source(deps, cfg, &candidate.url).await;
    let mut draft =
        content::generate_draft(&*deps.generator, topic, item, source.as_ref(), cfg).await?;

    let publication_count = db::count_published(pool)
        .await
        .map_err(StageError::StateStore)?;
    let external_required =
        links::external_link_required(publication_count, cfg.seo.external_link_interval);
    let (cleaned_body, _stats) = links::cleanup_and_enrich(
        &draft.body_html,
        &cfg.site_domain(),
        &cfg.wordpress.internal_links,
        Some(candidate.url.as_str()),
        external_required,
    );
    draft.body_html = cleaned_body;

    let report = seo::evaluate(
        &draft,
        cfg,
        external_required,
        &topic.id,
        &candidate.url,
        Utc::now(),
    );
    if let Err(err) = db::record_seo_report(pool, &report).await {
        return Err(StageError::StateStore(err));
    }
    if report.verdict == SeoVerdict::Fail {
        return Err(StageError::SeoRejected {
            content_score: report.content_score,
            headline_score: report.headline_score,
        });
    }

    if mode == RunMode::Simulate {
        info!(
            title = %draft.title,
            content_score = report.content_score,
            headline_score = report.headline_score,
            "simulate: skipping CMS publication"
        );
        return Ok(CandidateOutcome::Simulated);
    }

    let media_id = prepare_featured_image(deps, cfg, &mut draft).await;
    let created = publish_draft(deps, topic, &draft, media_id).await?;

    if let Err(err) = db::set_wp_post_id(pool, &candidate.url, created.id).await {
        warn!(?err, "could not attach post id to record");
    }
    mark(
        pool,
        &candidate.url,
        &topic.id,
        &draft.title,
        item.usability_score,
        ProcessedStatus::Processed,
    )
    .await;
    if let Err(err) = db::set_last_published(pool, &topic.id, Utc::now()).await {
        warn!(?err, topic = %topic.id, "could not advance cadence marker");
    }

    deps.notifier
        .notify_draft_created(&DraftNotice {
            post_id: created.id,
            title: draft.title.clone(),
            topic_name: topic.name.clone(),
            author: topic.author.clone(),
            edit_url: created.edit_url.clone(),
            content_score: report.content_score,
            headline_score: report.headline_score,
        })
        .await;

    Ok(CandidateOutcome::Published(created))
}

/// Source text is enrichment only; every failure degrades to snippet-only
/// generation.
async fn fetch_source(deps: &Collaborators, cfg: &Config, url: &str) -> Option<SourceText> {
    if !cfg.content.source_fetch_enabled {
        return None;
    }
    match deps
        .fetcher
        .fetch_text(url, cfg.content.source_fetch_max_chars)
        .await
    {
        Ok(source) => Some(source),
        Err(err) => {
            warn!(?err, url, "source fetch failed; generating from snippet only");
            None
        }
    }
}

/// Generate, re-encode, and upload the cover image. Entirely best-effort:
/// a draft without a featured image is still publishable.
async fn prepare_featured_image(
    deps: &Collaborators,
    cfg: &Config,
    draft: &mut Draft,
) -> Option<i64> {
    if !cfg.image.enabled || draft.image_prompt.is_empty() {
        return None;
    }
    let generator = deps.image.as_ref()?;

    let bytes = match generator.generate_cover(&draft.image_prompt).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(?err, "cover generation failed; continuing without image");
            return None;
        }
    };

    let slug = html::slugify(&draft.title);
    let images_dir = Path::new(&cfg.app.data_dir).join("images");
    let cover_path = match imaging::prepare_cover(&bytes, &images_dir, &slug, &cfg.image).await {
        Ok(path) => path,
        Err(err) => {
            warn!(?err, "cover re-encode failed; continuing without image");
            return None;
        }
    };

    let cover_bytes = match tokio::fs::read(&cover_path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(?err, "could not read cover file; continuing without image");
            return None;
        }
    };
    let filename = cover_path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("cover.jpg")
        .to_string();
    let meta = MediaMeta {
        title: draft.title.clone(),
        alt_text: draft.image_alt_text.clone(),
        caption: draft.excerpt.clone(),
        description: draft.seo_description.clone(),
    };
    match deps.cms.upload_media(cover_bytes, &filename, &meta).await {
        Ok(media_id) => {
            draft.cover_image_ref = Some(cover_path.to_string_lossy().into_owned());
            Some(media_id)
        }
        Err(err) => {
            warn!(?err, "media upload failed; continuing without image");
            None
        }
    }
}

/// Resolve taxonomies and create the CMS draft. Term and author resolution
/// failures degrade; only the draft creation itself is fatal to the item.
async fn publish_draft(
    deps: &Collaborators,
    topic: &Topic,
    draft: &Draft,
    media_id: Option<i64>,
) -> Result<CreatedDraft, StageError> {
    let mut category_ids = Vec::new();
    for name in &draft.categories {
        match deps.cms.resolve_or_create_term("categories", name).await {
            Ok(id) => category_ids.push(id),
            Err(err) => warn!(?err, name = %name, "could not resolve category"),
        }
    }
    let mut tag_ids = Vec::new();
    for name in &draft.tags {
        match deps.cms.resolve_or_create_term("tags", name).await {
            Ok(id) => tag_ids.push(id),
            Err(err) => warn!(?err, name = %name, "could not resolve tag"),
        }
    }

    let author_id = if topic.author.is_empty() {
        None
    } else {
        match deps.cms.resolve_author(&topic.author).await {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                warn!(author = %topic.author, "author not found; using CMS default");
                None
            }
            Err(err) => {
                warn!(?err, author = %topic.author, "author lookup failed; using CMS default");
                None
            }
        }
    };

    deps.cms
        .create_draft(draft, &category_ids, &tag_ids, author_id, media_id)
        .await
        .map_err(StageError::Publish)
}
