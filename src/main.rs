//! # pubcrawler
//!
//! An academic-paper crawler. It reads a YAML list of crawl tasks, scrapes
//! each conference or journal with the strategy its `source_type` selects,
//! normalizes every result into one paper record, and writes per-task JSON,
//! Markdown and (optionally) PDF output.
//!
//! ## Supported sources
//!
//! - OpenReview (API v1 and v2, optional review enrichment)
//! - Static HTML proceedings (CVF open access, PMLR, ACL Anthology)
//! - JavaScript-rendered listings through a WebDriver browser (IJCAI, KDD)
//! - Paginated REST listings (IEEE Xplore journals)
//! - The arXiv Atom API
//!
//! ## Usage
//!
//! ```sh
//! pubcrawler -c configs/tasks.yaml -o ./output
//! ```
//!
//! ## Architecture
//!
//! 1. **Configuration**: load tasks, source definitions and settings
//! 2. **Build**: resolve each task into a scraper configuration
//! 3. **Scrape**: run one strategy per task, tasks strictly in sequence
//! 4. **Post-process**: keyword filter, limit, de-duplicate, annotate
//! 5. **Output**: hand each task's records to the JSON, Markdown and PDF sinks

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod context;
mod error;
mod filter;
mod models;
mod network;
mod outputs;
mod pool;
mod runner;
mod scrapers;
mod task;
mod utils;

use cli::Cli;
use config::load_config;
use context::AppContext;
use outputs::{json::JsonSink, markdown::MarkdownSink, pdf::PdfSink};
use runner::TaskRunner;
use utils::ensure_writable_dir;

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
    info!("pubcrawler starting up");

    let args = Cli::parse();
    debug!(config = %args.config.display(), output_dir = %args.output_dir.display(), tasks = ?args.tasks, "Parsed CLI arguments");

    let mut config = load_config(&args.config).await.inspect_err(|e| {
        error!(path = %args.config.display(), error = %e, "Could not load configuration");
    })?;
    if let Some(url) = args.webdriver_url {
        info!(%url, "Using WebDriver endpoint from command line");
        config.settings.browser.webdriver_url = url;
    }

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let ctx = AppContext::from_settings(config.settings.clone())?;
    let runner = TaskRunner::new(&ctx)
        .with_sink(Box::new(JsonSink::new(args.output_dir.clone())))
        .with_sink(Box::new(MarkdownSink::new(args.output_dir.clone())))
        .with_sink(Box::new(PdfSink::new(args.output_dir.clone(), ctx.http.clone())))
        .only(args.tasks);

    let report = runner.run(&config).await;

    for task in &report.tasks {
        info!(task = %task.name, outcome = %task.outcome, "Task summary");
    }
    for (conference, papers) in report.by_conference() {
        info!(%conference, count = papers.len(), "Collected papers");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        papers = report.papers.len(),
        failed_tasks = report.failed(),
        "Execution complete"
    );

    Ok(())
}
