use crate::config::Search;
use crate::db::{self, Pool};
use crate::html;
use crate::model::Candidate;
use crate::topics::Topic;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

const BRAVE_API_BASE: &str = "https://api.search.brave.com/";
const SEARCH_RETRIES: u32 = 3;

/// One raw hit from the search provider, in provider relevance order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub page_age: Option<String>,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

#[derive(Clone)]
pub struct BraveSearchClient {
    http: Client,
    base_url: Url,
    api_key: String,
    count: u32,
    country: String,
    lang: String,
    freshness: String,
}

impl fmt::Debug for BraveSearchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BraveSearchClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: BraveWebResults,
}

#[derive(Deserialize, Default)]
struct BraveWebResults {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    page_age: Option<String>,
}

impl BraveSearchClient {
    pub fn from_config(cfg: &Search) -> Self {
        let base_url = Url::parse(BRAVE_API_BASE).expect("valid default Brave URL");
        Self::with_base_url(cfg, base_url)
    }

    pub fn with_base_url(cfg: &Search, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("wp-draftbot/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
            count: cfg.count,
            country: cfg.country.clone(),
            lang: cfg.lang.clone(),
            freshness: cfg.freshness.clone(),
        }
    }

    pub fn build_request(&self, query: &str) -> Result<reqwest::Request> {
        let mut endpoint = self
            .base_url
            .join("res/v1/web/search")
            .context("invalid Brave base URL")?;
        {
            let mut params = endpoint.query_pairs_mut();
            params.append_pair("q", query);
            params.append_pair("count", &self.count.to_string());
            if !self.country.is_empty() {
                params.append_pair("country", &self.country);
            }
            if !self.lang.is_empty() {
                params.append_pair("search_lang", &self.lang);
            }
            if !self.freshness.is_empty() {
                params.append_pair("freshness", &self.freshness);
            }
        }
        self.http
            .get(endpoint)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .build()
            .context("failed to build search request")
    }

    async fn execute_search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let request = self.build_request(query)?;
        debug!(url=%request.url(), "sending search request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach search provider")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from search provider: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("search provider error {}: {}", status, body));
        }

        let payload: BraveResponse = res.json().await.context("invalid search response")?;
        Ok(payload
            .web
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: r.description,
                page_age: r.page_age,
            })
            .collect())
    }
}

#[async_trait]
impl SearchClient for BraveSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let mut last_err = None;
        for attempt in 0..SEARCH_RETRIES {
            match self.execute_search(query).await {
                Ok(hits) => return Ok(hits),
                Err(err) => {
                    let wait = 2u64 << attempt;
                    warn!(
                        ?err,
                        attempt = attempt + 1,
                        retries = SEARCH_RETRIES,
                        query,
                        "search attempt failed; retrying in {}s",
                        wait
                    );
                    last_err = Some(err);
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("search failed")))
    }
}

fn parse_page_age(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc())
        })
}

fn domain_excluded(domain: &str, excluded: &[String]) -> bool {
    excluded.iter().any(|e| {
        let e = e.trim().to_lowercase();
        !e.is_empty() && (domain == e || domain.ends_with(&format!(".{e}")))
    })
}

fn mentions_blocked_term(hit: &SearchHit, domain: &str, blocked: &[String]) -> bool {
    let haystack = format!("{} {} {}", hit.title, domain, hit.snippet).to_lowercase();
    blocked.iter().any(|term| {
        let term = term.trim().to_lowercase();
        !term.is_empty() && haystack.contains(&term)
    })
}

/// Run every topic query in order and normalize the hits into candidates,
/// dropping excluded domains, blocked source terms, duplicates within the
/// run, and URLs the state store has already seen. Provider relevance
/// order is preserved. An empty result is not an error.
pub async fn collect_candidates(
    pool: &Pool,
    client: &dyn SearchClient,
    topic: &Topic,
    cfg: &Search,
) -> Result<Vec<Candidate>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut candidates = Vec::new();

    for query in &topic.queries {
        info!(topic = %topic.id, query, "searching");
        let hits = match client.search(query).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(?err, topic = %topic.id, query, "query failed; skipping");
                continue;
            }
        };

        for hit in hits {
            if hit.url.is_empty() || seen.contains(&hit.url) {
                continue;
            }
            let domain = html::domain_of(&hit.url);
            if domain.is_empty() || domain_excluded(&domain, &cfg.excluded_domains) {
                continue;
            }
            if mentions_blocked_term(&hit, &domain, &cfg.blocked_source_terms) {
                continue;
            }
            if db::has_processed(pool, &hit.url).await? {
                continue;
            }
            seen.insert(hit.url.clone());
            candidates.push(Candidate {
                published_at: parse_page_age(hit.page_age.as_deref()),
                url: hit.url,
                title: hit.title,
                snippet: hit.snippet,
                source_domain: domain,
                topic_id: topic.id.clone(),
            });
        }
    }

    info!(topic = %topic.id, total = candidates.len(), "new unique candidates");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcessedStatus;

    fn search_cfg() -> Search {
        Search {
            api_key: "k".into(),
            count: 10,
            country: "mx".into(),
            lang: "es".into(),
            freshness: "pw".into(),
            excluded_domains: vec!["excluded.org".into()],
            blocked_source_terms: vec!["pinterest".into()],
        }
    }

    fn topic() -> Topic {
        Topic {
            id: "t1".into(),
            name: "Topic".into(),
            author: String::new(),
            queries: vec!["q1".into(), "q2".into()],
            categories: vec![],
            min_score: 60.0,
            scoring_guidance: String::new(),
            writing_guidance: String::new(),
        }
    }

    fn hit(url: &str, title: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            url: url.into(),
            snippet: "snippet".into(),
            page_age: None,
        }
    }

    struct ScriptedSearch {
        responses: std::sync::Mutex<std::collections::VecDeque<Result<Vec<SearchHit>>>>,
    }

    impl ScriptedSearch {
        fn new(responses: Vec<Result<Vec<SearchHit>>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl SearchClient for ScriptedSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    async fn setup_pool() -> Pool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn dedupes_and_preserves_order() {
        let pool = setup_pool().await;
        let client = ScriptedSearch::new(vec![
            Ok(vec![hit("https://a.com/1", "A"), hit("https://b.com/2", "B")]),
            Ok(vec![hit("https://a.com/1", "A again"), hit("https://c.com/3", "C")]),
        ]);
        let found = collect_candidates(&pool, &client, &topic(), &search_cfg())
            .await
            .unwrap();
        let urls: Vec<&str> = found.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.com/1", "https://b.com/2", "https://c.com/3"]);
        assert_eq!(found[0].source_domain, "a.com");
        assert_eq!(found[0].topic_id, "t1");
    }

    #[tokio::test]
    async fn filters_excluded_blocked_and_processed() {
        let pool = setup_pool().await;
        db::mark_processed(&pool, "https://d.com/old", "t1", "", 0.0, ProcessedStatus::Processed)
            .await
            .unwrap();
        let client = ScriptedSearch::new(vec![Ok(vec![
            hit("https://excluded.org/x", "Excluded"),
            hit("https://sub.excluded.org/y", "Excluded sub"),
            hit("https://ok.com/1", "Best Pinterest boards"),
            hit("https://d.com/old", "Old"),
            hit("https://d.com/new", "Fresh"),
        ])]);
        let found = collect_candidates(&pool, &client, &topic(), &search_cfg())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://d.com/new");
    }

    #[tokio::test]
    async fn failed_query_skipped_not_fatal() {
        let pool = setup_pool().await;
        let client = ScriptedSearch::new(vec![
            Err(anyhow!("provider down")),
            Ok(vec![hit("https://ok.com/1", "Fine")]),
        ]);
        let found = collect_candidates(&pool, &client, &topic(), &search_cfg())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn page_age_parsing() {
        assert!(parse_page_age(Some("2026-08-01T10:00:00Z")).is_some());
        assert!(parse_page_age(Some("2026-08-01T10:00:00")).is_some());
        assert!(parse_page_age(Some("hace 3 días")).is_none());
        assert!(parse_page_age(None).is_none());
    }

    #[test]
    fn brave_request_shape() {
        let client = BraveSearchClient::from_config(&search_cfg());
        let req = client.build_request("método montessori").unwrap();
        assert_eq!(req.method(), reqwest::Method::GET);
        assert_eq!(req.url().path(), "/res/v1/web/search");
        let query = req.url().query().unwrap();
        assert!(query.contains("count=10"));
        assert!(query.contains("country=mx"));
        assert!(query.contains("freshness=pw"));
        assert_eq!(
            req.headers().get("X-Subscription-Token").unwrap(),
            "k"
        );
    }
}
