use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use wp_draftbot::config;
use wp_draftbot::db::{self, ReportFilter};

#[derive(Debug, Parser)]
#[command(author, version, about = "Inspect stored local SEO reports")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Max rows to display
    #[arg(long, default_value = "20")]
    limit: i64,

    /// Filter by topic id
    #[arg(long)]
    topic_id: Option<String>,

    /// Show only items whose terminal status is seo_failed
    #[arg(long)]
    only_failed: bool,

    /// Print as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/draftbot.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let rows = db::query_reports(
        &pool,
        &ReportFilter {
            limit: args.limit.max(1),
            topic_id: args
                .topic_id
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned),
            only_failed: args.only_failed,
        },
    )
    .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No SEO reports match the given filters.");
        return Ok(());
    }

    println!("created_at | topic_id | status | content | headline | title/url");
    println!("{}", "-".repeat(120));
    for row in rows {
        let title = row
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&row.url);
        println!(
            "{} | {} | {} | {} | {} | {}",
            row.created_at,
            row.topic_id,
            row.status.as_deref().unwrap_or("-"),
            row.content_score,
            row.headline_score,
            title
        );
    }
    Ok(())
}
