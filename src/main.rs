//! # ESG News
//!
//! Collects news coverage of rated companies from Russian business media
//! (Forbes, Vedomosti, Kommersant) for ESG analysis, and scores individual
//! articles against environmental criteria with an LLM judge.
//!
//! ## Usage
//!
//! ```sh
//! esg_news scrape --catalog request.csv
//! esg_news merge data/parse_run_*/Acme_*.csv -o merged.csv
//! esg_news score --criteria criteria.json --input input.txt
//! ```
//!
//! ## Architecture
//!
//! The scrape pipeline:
//! 1. **Catalog**: read (company, year) work items from the request catalog
//! 2. **Scraping**: run every source for every work item on a bounded task pool
//! 3. **Partial output**: each task writes its own TSV into the run directory
//! 4. **Merge**: concatenate all partial files into `merged_results.csv`

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod catalog;
mod cli;
mod config;
mod coordinator;
mod error;
mod http;
mod models;
mod outputs;
mod scoring;
mod scrapers;
mod utils;

use api::{ChatClient, RetryAsk};
use cli::{Cli, Command, MergeArgs, ScoreArgs, ScrapeArgs};
use config::{LlmConfig, ScraperConfig};
use coordinator::{Coordinator, progress_bar};
use http::{Fetcher, ReqwestTransport};
use outputs::merge::{MERGED_FILE_NAME, merge_results};
use outputs::partial::PartialWriter;
use scrapers::Pacing;
use utils::ensure_writable_dir;

/// Judge calls can be slow on long articles.
const LLM_TIMEOUT: Duration = Duration::from_secs(120);

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();

    match args.command {
        Command::Scrape(args) => {
            info!(catalog = %args.catalog.display(), "esg_news scrape starting up");
            scrape(args).await?
        }
        Command::Merge(args) => merge(args).await?,
        Command::Score(args) => score(args).await?,
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

async fn scrape(args: ScrapeArgs) -> Result<(), Box<dyn Error>> {
    let mut config: ScraperConfig = config::load(args.config.as_deref()).await?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    info!(?config, "Scraper configuration");

    ensure_writable_dir(&config.output_dir).await?;
    let requests = catalog::read_news_requests(&args.catalog).await?;

    let transport = ReqwestTransport::new(config.request_timeout())?;
    let fetcher = Fetcher::new(Arc::new(transport), config.retry_policy());
    let adapters = scrapers::registry(&fetcher, Pacing::default());
    let writer = Arc::new(PartialWriter::new(&config.output_dir));

    let report = Coordinator::new(adapters, Arc::clone(&writer))
        .with_max_workers(config.max_workers)
        .with_progress(progress_bar(args.quiet))
        .run(&requests)
        .await;

    let merged_path = writer.run_dir().await?.join(MERGED_FILE_NAME);
    let merged = merge_results(&report.paths, &merged_path, config.min_file_bytes).await?;

    info!(
        tasks = report.total,
        completed = report.completed,
        failed = report.failed,
        articles = report.articles,
        files_merged = merged.files_processed - merged.files_skipped,
        rows = merged.rows,
        path = %merged.output.display(),
        "Scrape finished"
    );
    Ok(())
}

async fn merge(args: MergeArgs) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_writable_dir(parent).await?;
    }
    let report = merge_results(&args.files, &args.output, args.min_file_bytes).await?;
    for (path, rows) in &report.per_file {
        info!(path = %path.display(), rows, "Merged file");
    }
    Ok(())
}

async fn score(args: ScoreArgs) -> Result<(), Box<dyn Error>> {
    let criteria = scoring::load_criteria(&args.criteria).await?;
    let article = scoring::read_text(&args.input).await?;
    if article.trim().is_empty() {
        return Err(format!("input text {} is empty", args.input.display()).into());
    }

    let llm: LlmConfig = config::load(args.llm_config.as_deref()).await?;
    let llm = llm.with_env_key(args.api_key);
    info!(?llm, "LLM configuration");

    let judge = RetryAsk::new(ChatClient::new(llm, LLM_TIMEOUT)?, 5, Duration::from_secs(1));
    let result = scoring::score_article(&judge, &article, &criteria).await?;

    println!("{}", scoring::render_report(&result, args.debug));
    tokio::fs::write(&args.output, scoring::render_report(&result, false)).await?;
    info!(path = %args.output.display(), score = result.score(), "Score saved");
    Ok(())
}
