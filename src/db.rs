use crate::model::{ProcessedStatus, SeoReport};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), tail),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// True when the URL already has a terminal record, whatever its status.
#[instrument(skip_all)]
pub async fn has_processed(pool: &Pool, url: &str) -> Result<bool> {
    let row = sqlx::query_scalar::<_, i64>("SELECT 1 FROM processed_articles WHERE url = ?")
        .bind(url)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Record a terminal outcome for a URL. Insert-or-ignore: marking the same
/// URL again is a no-op, never an error. Returns false when a record already
/// existed.
#[instrument(skip_all)]
pub async fn mark_processed(
    pool: &Pool,
    url: &str,
    topic_id: &str,
    title: &str,
    score: f64,
    status: ProcessedStatus,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO processed_articles (url, topic_id, title, score, status, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(url) DO NOTHING",
    )
    .bind(url)
    .bind(topic_id)
    .bind(title)
    .bind(score)
    .bind(status.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Attach the CMS post id to an existing record.
#[instrument(skip_all)]
pub async fn set_wp_post_id(pool: &Pool, url: &str, wp_post_id: i64) -> Result<()> {
    sqlx::query("UPDATE processed_articles SET wp_post_id = ? WHERE url = ?")
        .bind(wp_post_id)
        .bind(url)
        .execute(pool)
        .await?;
    Ok(())
}

/// Most recent publish timestamp, for one topic or across all topics.
#[instrument(skip_all)]
pub async fn last_published(pool: &Pool, topic_id: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let ts = match topic_id {
        Some(id) => {
            sqlx::query_scalar::<_, DateTime<Utc>>(
                "SELECT last_published_at FROM topic_cadence WHERE topic_id = ?",
            )
            .bind(id)
            .fetch_optional(pool)
            .await?
        }
        None => {
            // MAX over an empty table yields one NULL row.
            sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
                "SELECT MAX(last_published_at) FROM topic_cadence",
            )
            .fetch_one(pool)
            .await?
        }
    };
    Ok(ts)
}

/// Advance a topic's cadence marker. Monotonic: an older timestamp never
/// overwrites a newer one.
#[instrument(skip_all)]
pub async fn set_last_published(pool: &Pool, topic_id: &str, ts: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "INSERT INTO topic_cadence (topic_id, last_published_at) VALUES (?, ?) \
         ON CONFLICT(topic_id) DO UPDATE SET last_published_at = excluded.last_published_at \
         WHERE excluded.last_published_at > topic_cadence.last_published_at",
    )
    .bind(topic_id)
    .bind(ts)
    .execute(pool)
    .await?;
    Ok(())
}

/// Number of successfully published drafts, driving external-link rotation.
#[instrument(skip_all)]
pub async fn count_published(pool: &Pool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM processed_articles WHERE status = 'processed'",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Append one SEO gate evaluation. Reports are never updated or deleted.
#[instrument(skip_all)]
pub async fn record_seo_report(pool: &Pool, report: &SeoReport) -> Result<()> {
    let checks =
        serde_json::to_string(&report.checks).context("failed to serialize SEO checks")?;
    sqlx::query(
        "INSERT INTO seo_reports (topic_id, url, content_score, headline_score, checks, verdict, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&report.topic_id)
    .bind(&report.url)
    .bind(report.content_score as i64)
    .bind(report.headline_score as i64)
    .bind(checks)
    .bind(report.verdict.as_str())
    .bind(report.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub limit: i64,
    pub topic_id: Option<String>,
    pub only_failed: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReportRow {
    pub created_at: String,
    pub topic_id: String,
    pub url: String,
    pub content_score: i64,
    pub headline_score: i64,
    pub verdict: String,
    pub checks: String,
    pub status: Option<String>,
    pub title: Option<String>,
}

/// Stored SEO reports, most recent first, joined with the processed-URL
/// record for title and terminal status.
#[instrument(skip_all)]
pub async fn query_reports(pool: &Pool, filter: &ReportFilter) -> Result<Vec<ReportRow>> {
    let mut sql = String::from(
        "SELECT sr.created_at, sr.topic_id, sr.url, sr.content_score, sr.headline_score, \
                sr.verdict, sr.checks, pa.status, pa.title \
         FROM seo_reports sr \
         LEFT JOIN processed_articles pa ON pa.url = sr.url",
    );
    let mut clauses: Vec<&str> = Vec::new();
    if filter.topic_id.is_some() {
        clauses.push("sr.topic_id = ?");
    }
    if filter.only_failed {
        clauses.push("pa.status = 'seo_failed'");
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY sr.created_at DESC LIMIT ?");

    let mut query = sqlx::query(&sql);
    if let Some(topic_id) = &filter.topic_id {
        query = query.bind(topic_id);
    }
    query = query.bind(filter.limit.max(1));

    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| ReportRow {
            created_at: row.get::<String, _>("created_at"),
            topic_id: row.get("topic_id"),
            url: row.get("url"),
            content_score: row.get("content_score"),
            headline_score: row.get("headline_score"),
            verdict: row.get("verdict"),
            checks: row.get("checks"),
            status: row.get("status"),
            title: row.get("title"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SeoCheck, SeoVerdict};
    use chrono::Duration;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_report(url: &str, verdict: SeoVerdict) -> SeoReport {
        SeoReport {
            topic_id: "t1".into(),
            url: url.into(),
            content_score: 80,
            headline_score: 70,
            checks: vec![SeoCheck {
                key: "internal_links".into(),
                passed: verdict == SeoVerdict::Pass,
                weight: 1.0,
            }],
            verdict,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn mark_is_idempotent() {
        let pool = setup_pool().await;
        let url = "https://example.com/a";

        assert!(!has_processed(&pool, url).await.unwrap());
        let inserted = mark_processed(&pool, url, "t1", "A", 80.0, ProcessedStatus::Processed)
            .await
            .unwrap();
        assert!(inserted);
        assert!(has_processed(&pool, url).await.unwrap());

        // Second mark with a different status is a no-op, not an error.
        let inserted = mark_processed(&pool, url, "t1", "A", 10.0, ProcessedStatus::GenFailed)
            .await
            .unwrap();
        assert!(!inserted);
        assert!(has_processed(&pool, url).await.unwrap());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_articles")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let status: String = sqlx::query_scalar("SELECT status FROM processed_articles WHERE url = ?")
            .bind(url)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "processed");
    }

    #[tokio::test]
    async fn cadence_marker_is_monotonic() {
        let pool = setup_pool().await;
        let now = Utc::now();
        let earlier = now - Duration::days(2);

        assert!(last_published(&pool, Some("t1")).await.unwrap().is_none());
        set_last_published(&pool, "t1", now).await.unwrap();
        let stored = last_published(&pool, Some("t1")).await.unwrap().unwrap();
        assert!(stored > earlier);

        // Older timestamp must not win.
        set_last_published(&pool, "t1", earlier).await.unwrap();
        assert_eq!(last_published(&pool, Some("t1")).await.unwrap(), Some(stored));

        // Global marker is the max across topics.
        set_last_published(&pool, "t2", earlier).await.unwrap();
        assert_eq!(last_published(&pool, None).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn seo_reports_append_and_query() {
        let pool = setup_pool().await;
        record_seo_report(&pool, &sample_report("https://e.com/1", SeoVerdict::Fail))
            .await
            .unwrap();
        record_seo_report(&pool, &sample_report("https://e.com/2", SeoVerdict::Pass))
            .await
            .unwrap();
        mark_processed(&pool, "https://e.com/1", "t1", "One", 70.0, ProcessedStatus::SeoFailed)
            .await
            .unwrap();

        let all = query_reports(
            &pool,
            &ReportFilter {
                limit: 10,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(all.len(), 2);

        let failed = query_reports(
            &pool,
            &ReportFilter {
                limit: 10,
                only_failed: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].url, "https://e.com/1");
        assert_eq!(failed[0].title.as_deref(), Some("One"));
    }

    #[tokio::test]
    async fn count_published_counts_only_success() {
        let pool = setup_pool().await;
        mark_processed(&pool, "https://e.com/1", "t1", "", 80.0, ProcessedStatus::Processed)
            .await
            .unwrap();
        mark_processed(&pool, "https://e.com/2", "t1", "", 10.0, ProcessedStatus::GenFailed)
            .await
            .unwrap();
        assert_eq!(count_published(&pool).await.unwrap(), 1);
    }
}
