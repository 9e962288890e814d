use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use wp_draftbot::config;
use wp_draftbot::db;
use wp_draftbot::fetch::HttpSourceFetcher;
use wp_draftbot::gemini::GeminiClient;
use wp_draftbot::imaging::{self, CoverImageGenerator};
use wp_draftbot::notify::HttpNotifier;
use wp_draftbot::pipeline::{self, Collaborators, RunMode};
use wp_draftbot::search::BraveSearchClient;
use wp_draftbot::topics;
use wp_draftbot::wordpress::WordPressClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Curate news and publish WordPress drafts for topical verticals")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run the decision pipeline without publishing or marking URLs
    #[arg(long)]
    simulate: bool,

    /// Restrict the run to these topic ids (repeatable)
    #[arg(long = "topic")]
    topics: Vec<String>,
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
    cfg.ensure_dirs()?;

    let topics = topics::load_topics(
        Path::new(&cfg.app.topics_file),
        cfg.scoring.min_usability_score,
        &args.topics,
    )?;
    info!(topics = topics.len(), simulate = args.simulate, "starting pipeline run");

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/draftbot.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let gemini = Arc::new(GeminiClient::from_config(&cfg.gemini));
    let image: Option<Arc<dyn CoverImageGenerator>> = if cfg.image.enabled {
        match imaging::ensure_ffmpeg_available().await {
            Ok(()) => Some(gemini.clone()),
            Err(err) => {
                warn!(?err, "cover images disabled for this run");
                None
            }
        }
    } else {
        None
    };

    let deps = Collaborators {
        search: Arc::new(BraveSearchClient::from_config(&cfg.search)),
        evaluator: gemini.clone(),
        generator: gemini.clone(),
        fetcher: Arc::new(HttpSourceFetcher::new()),
        image,
        cms: Arc::new(WordPressClient::from_config(&cfg.wordpress)?),
        notifier: Arc::new(HttpNotifier::from_config(&cfg.notify)),
    };

    let mode = if args.simulate {
        RunMode::Simulate
    } else {
        RunMode::Publish
    };
    let summary = pipeline::run(&pool, &cfg, &topics, &deps, mode).await?;

    println!(
        "published={} rejected={} skipped={}{}",
        summary.published,
        summary.rejected,
        summary.skipped,
        if summary.cadence_skipped {
            " (cadence lock active)"
        } else {
            ""
        }
    );
    Ok(())
}
