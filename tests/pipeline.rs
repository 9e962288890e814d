use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use wp_draftbot::config::Config;
use wp_draftbot::content::ContentGenerator;
use wp_draftbot::db;
use wp_draftbot::fetch::SourceFetcher;
use wp_draftbot::imaging::CoverImageGenerator;
use wp_draftbot::model::{CreatedDraft, Draft, SeoCheck, SourceText};
use wp_draftbot::notify::{DraftNotice, Notifier};
use wp_draftbot::pipeline::{run, Collaborators, RunMode};
use wp_draftbot::scorer::{Evaluation, TextEvaluator};
use wp_draftbot::search::{SearchClient, SearchHit};
use wp_draftbot::topics::Topic;
use wp_draftbot::wordpress::{CmsClient, MediaMeta};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn test_config() -> Config {
    let mut cfg: Config = serde_yaml::from_str(wp_draftbot::config::example()).unwrap();
    cfg.app.max_posts_per_run = 1;
    cfg.app.publish_interval_days = 0;
    cfg.content.min_body_words = 20;
    cfg.content.source_fetch_enabled = false;
    cfg.image.enabled = false;
    cfg.seo.external_link_interval = 0;
    // No fallback links: a draft must carry its own internal link.
    cfg.wordpress.internal_links = vec![];
    cfg
}

fn topic(id: &str) -> Topic {
    Topic {
        id: id.into(),
        name: format!("Vertical {id}"),
        author: String::new(),
        queries: vec!["educación temprana noticias".into()],
        categories: vec!["Educación".into()],
        min_score: 60.0,
        scoring_guidance: String::new(),
        writing_guidance: String::new(),
    }
}

fn hit(url: &str, title: &str) -> SearchHit {
    SearchHit {
        title: title.into(),
        url: url.into(),
        snippet: "novedades del ciclo 2026".into(),
        page_age: None,
    }
}

fn body_with_internal_link() -> String {
    let mut body = String::from("<h2>Claves del anuncio</h2>");
    for _ in 0..3 {
        body.push_str(
            "<p>La escuela de educación temprana anunció un programa nuevo con \
             fechas concretas y testimonios de familias de la comunidad.</p>",
        );
    }
    body.push_str(r#"<p>Más detalles en <a href="/blog">nuestro blog</a>.</p>"#);
    body
}

fn body_without_links() -> String {
    let mut body = String::from("<h2>Claves del anuncio</h2>");
    for _ in 0..3 {
        body.push_str(
            "<p>La escuela de educación temprana anunció un programa nuevo con \
             fechas concretas y testimonios de familias de la comunidad.</p>",
        );
    }
    body
}

fn draft_payload(body: &str) -> String {
    serde_json::json!({
        "title": "5 claves de la educación temprana para familias en 2026",
        "body": body,
        "excerpt": "Las claves del nuevo programa de educación temprana",
        "categories": ["Educación"],
        "tags": ["educación temprana", "familias"],
        "seo_title": "Educación temprana: 5 claves del nuevo programa",
        "seo_description": "La educación temprana suma un programa nuevo con fechas, \
                            testimonios y claves prácticas para familias y educadores.",
        "focus_keyphrase": "educación temprana",
        "social_title": "",
        "social_description": "",
        "image_prompt": "a bright classroom",
        "image_alt_text": "aula luminosa"
    })
    .to_string()
}

#[derive(Clone, Default)]
struct RecordingSearch {
    responses: Arc<Mutex<VecDeque<Result<Vec<SearchHit>>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingSearch {
    fn with_responses(responses: Vec<Result<Vec<SearchHit>>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Default::default()
        }
    }

    async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait::async_trait]
impl SearchClient for RecordingSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.calls.lock().await.push(query.to_string());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(vec![]))
    }
}

#[derive(Clone, Default)]
struct RecordingEvaluator {
    scores: Arc<Mutex<VecDeque<Result<f64>>>>,
}

impl RecordingEvaluator {
    fn with_scores(scores: Vec<Result<f64>>) -> Self {
        Self {
            scores: Arc::new(Mutex::new(scores.into())),
        }
    }
}

#[async_trait::async_trait]
impl TextEvaluator for RecordingEvaluator {
    async fn score(&self, _prompt: &str) -> Result<Evaluation> {
        let score = self
            .scores
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(80.0))?;
        Ok(Evaluation {
            score,
            rationale: None,
        })
    }
}

#[derive(Clone, Default)]
struct RecordingGenerator {
    responses: Arc<Mutex<VecDeque<Result<String>>>>,
}

impl RecordingGenerator {
    fn with_responses(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
        }
    }
}

#[async_trait::async_trait]
impl ContentGenerator for RecordingGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(draft_payload(&body_with_internal_link())))
    }
}

struct FailingFetcher;

#[async_trait::async_trait]
impl SourceFetcher for FailingFetcher {
    async fn fetch_text(&self, _url: &str, _max_chars: usize) -> Result<SourceText> {
        Err(anyhow!("fetch disabled in tests"))
    }
}

#[derive(Clone, Default)]
struct RecordingCms {
    create_results: Arc<Mutex<VecDeque<Result<CreatedDraft>>>>,
    drafts: Arc<Mutex<Vec<Draft>>>,
}

impl RecordingCms {
    fn with_results(results: Vec<Result<CreatedDraft>>) -> Self {
        Self {
            create_results: Arc::new(Mutex::new(results.into())),
            ..Default::default()
        }
    }

    async fn created(&self) -> Vec<Draft> {
        self.drafts.lock().await.clone()
    }
}

fn created_draft(id: i64) -> CreatedDraft {
    CreatedDraft {
        id,
        edit_url: format!("https://example.org/wp-admin/post.php?post={id}&action=edit"),
    }
}

#[async_trait::async_trait]
impl CmsClient for RecordingCms {
    async fn resolve_or_create_term(&self, _taxonomy: &str, name: &str) -> Result<i64> {
        Ok(name.len() as i64)
    }

    async fn resolve_author(&self, _name: &str) -> Result<Option<i64>> {
        Ok(None)
    }

    async fn upload_media(
        &self,
        _bytes: Vec<u8>,
        _filename: &str,
        _meta: &MediaMeta,
    ) -> Result<i64> {
        Ok(1)
    }

    async fn create_draft(
        &self,
        draft: &Draft,
        _category_ids: &[i64],
        _tag_ids: &[i64],
        _author_id: Option<i64>,
        _media_id: Option<i64>,
    ) -> Result<CreatedDraft> {
        self.drafts.lock().await.push(draft.clone());
        self.create_results
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(created_draft(100)))
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    notices: Arc<Mutex<Vec<DraftNotice>>>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_draft_created(&self, notice: &DraftNotice) {
        self.notices.lock().await.push(notice.clone());
    }
}

struct Fixture {
    search: RecordingSearch,
    cms: RecordingCms,
    notifier: RecordingNotifier,
    deps: Collaborators,
}

fn fixture(
    search: RecordingSearch,
    evaluator: RecordingEvaluator,
    generator: RecordingGenerator,
    cms: RecordingCms,
) -> Fixture {
    let notifier = RecordingNotifier::default();
    let deps = Collaborators {
        search: Arc::new(search.clone()),
        evaluator: Arc::new(evaluator),
        generator: Arc::new(generator),
        fetcher: Arc::new(FailingFetcher),
        image: None::<Arc<dyn CoverImageGenerator>>,
        cms: Arc::new(cms.clone()),
        notifier: Arc::new(notifier.clone()),
    };
    Fixture {
        search,
        cms,
        notifier,
        deps,
    }
}

#[tokio::test]
async fn scenario_low_score_then_seo_fail_then_publish() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let topics = vec![topic("t1")];

    let search = RecordingSearch::with_responses(vec![Ok(vec![
        hit("https://news.com/a", "Nota A del ciclo 2026"),
        hit("https://news.com/b", "Nota B del ciclo 2026"),
        hit("https://news.com/c", "Nota C del ciclo 2026"),
    ])]);
    let evaluator = RecordingEvaluator::with_scores(vec![Ok(45.0), Ok(72.0), Ok(80.0)]);
    // B generates a body with no internal link, so the SEO gate rejects
    // it; C generates a clean draft.
    let generator = RecordingGenerator::with_responses(vec![
        Ok(draft_payload(&body_without_links())),
        Ok(draft_payload(&body_with_internal_link())),
    ]);
    let cms = RecordingCms::with_results(vec![Ok(created_draft(101))]);
    let f = fixture(search, evaluator, generator, cms);

    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();

    assert_eq!(summary.published, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.skipped, 1); // candidate A, below the bar
    assert!(!summary.cadence_skipped);

    // A was never marked; B is seo_failed; C is processed.
    assert!(!db::has_processed(&pool, "https://news.com/a").await.unwrap());
    let status_b: String =
        sqlx::query_scalar("SELECT status FROM processed_articles WHERE url = ?")
            .bind("https://news.com/b")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status_b, "seo_failed");
    let status_c: String =
        sqlx::query_scalar("SELECT status FROM processed_articles WHERE url = ?")
            .bind("https://news.com/c")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status_c, "processed");

    // B's report is persisted with the internal-link flag down.
    let reports = db::query_reports(
        &pool,
        &db::ReportFilter {
            limit: 10,
            only_failed: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].url, "https://news.com/b");
    let checks: Vec<SeoCheck> = serde_json::from_str(&reports[0].checks).unwrap();
    let internal = checks.iter().find(|c| c.key == "internal_links").unwrap();
    assert!(!internal.passed);

    // C's publish advanced the cadence marker and fired a notification.
    assert!(db::last_published(&pool, Some("t1")).await.unwrap().is_some());
    let notices = f.notifier.notices.lock().await;
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].post_id, 101);
    assert!(notices[0].edit_url.contains("post=101"));

    // Only the winning draft reached the CMS.
    assert_eq!(f.cms.created().await.len(), 1);
}

#[tokio::test]
async fn per_run_cap_bounds_published_posts() {
    let pool = setup_pool().await;
    let mut cfg = test_config();
    cfg.app.max_posts_per_run = 2;
    let topics: Vec<Topic> = (1..=5).map(|i| topic(&format!("t{i}"))).collect();

    let search = RecordingSearch::with_responses(
        (1..=5)
            .map(|i| {
                Ok(vec![hit(
                    &format!("https://news.com/{i}"),
                    "Nota del ciclo 2026",
                )])
            })
            .collect(),
    );
    let evaluator = RecordingEvaluator::default(); // every candidate scores 80
    let generator = RecordingGenerator::default(); // every draft is publishable
    let cms = RecordingCms::default();
    let f = fixture(search, evaluator, generator, cms);

    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();

    assert_eq!(summary.published, 2);
    let processed: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM processed_articles WHERE status = 'processed'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(processed, 2);
    // The remaining three topics were left untouched for the next run.
    assert_eq!(f.search.call_count().await, 2);
}

#[tokio::test]
async fn cadence_lock_skips_recent_publishes_only() {
    let pool = setup_pool().await;
    let mut cfg = test_config();
    cfg.app.publish_interval_days = 7;
    let topics = vec![topic("t1")];

    // Published 3 days ago: locked.
    db::set_last_published(&pool, "t1", Utc::now() - Duration::days(3))
        .await
        .unwrap();
    let f = fixture(
        RecordingSearch::default(),
        RecordingEvaluator::default(),
        RecordingGenerator::default(),
        RecordingCms::default(),
    );
    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();
    assert!(summary.cadence_skipped);
    assert_eq!(summary.published, 0);
    assert_eq!(f.search.call_count().await, 0);

    // Published 8 days ago: drafting proceeds.
    let pool = setup_pool().await;
    db::set_last_published(&pool, "t1", Utc::now() - Duration::days(8))
        .await
        .unwrap();
    let search = RecordingSearch::with_responses(vec![Ok(vec![hit(
        "https://news.com/x",
        "Nota del ciclo 2026",
    )])]);
    let f = fixture(
        search,
        RecordingEvaluator::default(),
        RecordingGenerator::default(),
        RecordingCms::default(),
    );
    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();
    assert!(!summary.cadence_skipped);
    assert_eq!(summary.published, 1);
}

#[tokio::test]
async fn processed_urls_are_never_reselected() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let topics = vec![topic("t1")];

    let hits = vec![
        hit("https://news.com/a", "Nota A del ciclo 2026"),
        hit("https://news.com/b", "Nota B del ciclo 2026"),
    ];
    let search = RecordingSearch::with_responses(vec![Ok(hits.clone())]);
    let evaluator = RecordingEvaluator::with_scores(vec![Ok(40.0), Ok(80.0)]);
    let f = fixture(
        search,
        evaluator,
        RecordingGenerator::default(),
        RecordingCms::default(),
    );
    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();
    assert_eq!(summary.published, 1);

    // Second run sees the same provider results. B is filtered out by the
    // state store; A (never marked) is re-evaluated and rejected again.
    let search = RecordingSearch::with_responses(vec![Ok(hits)]);
    let evaluator = RecordingEvaluator::with_scores(vec![Ok(40.0)]);
    let f = fixture(
        search,
        evaluator,
        RecordingGenerator::default(),
        RecordingCms::default(),
    );
    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();
    assert_eq!(summary.published, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(f.cms.created().await.len(), 0);
}

#[tokio::test]
async fn publish_failure_marks_wp_failed_and_continues() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let topics = vec![topic("t1")];

    let search = RecordingSearch::with_responses(vec![Ok(vec![
        hit("https://news.com/a", "Nota A del ciclo 2026"),
        hit("https://news.com/b", "Nota B del ciclo 2026"),
    ])]);
    let cms = RecordingCms::with_results(vec![
        Err(anyhow!("wp is down")),
        Ok(created_draft(102)),
    ]);
    let f = fixture(
        search,
        RecordingEvaluator::default(),
        RecordingGenerator::default(),
        cms,
    );

    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();
    assert_eq!(summary.published, 1);
    assert_eq!(summary.rejected, 1);

    let status_a: String =
        sqlx::query_scalar("SELECT status FROM processed_articles WHERE url = ?")
            .bind("https://news.com/a")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status_a, "wp_failed");
    let status_b: String =
        sqlx::query_scalar("SELECT status FROM processed_articles WHERE url = ?")
            .bind("https://news.com/b")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status_b, "processed");
}

#[tokio::test]
async fn generation_failure_marks_gen_failed() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let topics = vec![topic("t1")];

    let search = RecordingSearch::with_responses(vec![Ok(vec![hit(
        "https://news.com/a",
        "Nota A del ciclo 2026",
    )])]);
    // Both attempts come back under the word minimum.
    let generator = RecordingGenerator::with_responses(vec![
        Ok(draft_payload("<p>corto</p>")),
        Ok(draft_payload("<p>breve</p>")),
    ]);
    let f = fixture(
        search,
        RecordingEvaluator::default(),
        generator,
        RecordingCms::default(),
    );

    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();
    assert_eq!(summary.published, 0);
    assert_eq!(summary.rejected, 1);
    let status: String = sqlx::query_scalar("SELECT status FROM processed_articles WHERE url = ?")
        .bind("https://news.com/a")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "gen_failed");
}

#[tokio::test]
async fn simulate_mode_persists_reports_but_not_state() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let topics = vec![topic("t1")];

    let search = RecordingSearch::with_responses(vec![Ok(vec![hit(
        "https://news.com/a",
        "Nota A del ciclo 2026",
    )])]);
    let f = fixture(
        search,
        RecordingEvaluator::default(),
        RecordingGenerator::default(),
        RecordingCms::default(),
    );

    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Simulate)
        .await
        .unwrap();
    assert_eq!(summary.published, 1);

    // The evaluation is on record, but nothing else moved.
    let reports: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seo_reports")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(reports, 1);
    assert!(!db::has_processed(&pool, "https://news.com/a").await.unwrap());
    assert!(db::last_published(&pool, None).await.unwrap().is_none());
    assert_eq!(f.cms.created().await.len(), 0);
    assert_eq!(f.notifier.notices.lock().await.len(), 0);
}

#[tokio::test]
async fn rotation_prefers_least_recently_published_topic() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let topics = vec![topic("t1"), topic("t2")];

    // t1 published yesterday; t2 never. t2 must go first and consume the cap.
    db::set_last_published(&pool, "t1", Utc::now() - Duration::days(1))
        .await
        .unwrap();

    let search = RecordingSearch::with_responses(vec![Ok(vec![hit(
        "https://news.com/t2-story",
        "Nota del ciclo 2026",
    )])]);
    let f = fixture(
        search,
        RecordingEvaluator::default(),
        RecordingGenerator::default(),
        RecordingCms::default(),
    );

    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();
    assert_eq!(summary.published, 1);

    let topic_id: String =
        sqlx::query_scalar("SELECT topic_id FROM processed_articles WHERE status = 'processed'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(topic_id, "t2");
}

#[tokio::test]
async fn empty_search_results_are_not_an_error() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let topics = vec![topic("t1")];

    let f = fixture(
        RecordingSearch::default(),
        RecordingEvaluator::default(),
        RecordingGenerator::default(),
        RecordingCms::default(),
    );
    let summary = run(&pool, &cfg, &topics, &f.deps, RunMode::Publish)
        .await
        .unwrap();
    assert_eq!(summary.published, 0);
    assert_eq!(summary.rejected, 0);
}
