//! Scraping strategies, one per source family.
//!
//! Each strategy takes a [`TaskConfig`] plus the shared [`AppContext`] and
//! produces normalized [`Paper`] records. Dispatch is a closed set: the task
//! builder maps a `source_type` tag to a [`SourceKind`], and [`Scraper::new`]
//! maps that kind to exactly one strategy.
//!
//! # Supported Sources
//!
//! | Kind | Module | Transport | Notes |
//! |------|--------|-----------|-------|
//! | OpenReview | [`openreview`] | REST/JSON | API v1 and v2, optional review enrichment |
//! | Static HTML | [`html`] | HTML | Index page then detail pages; rule table per family |
//! | Browser | [`browser`] | WebDriver | Title + link only; session always released |
//! | Paginated REST | [`ieee`] | REST/JSON | Issue id resolution then paged listing |
//! | arXiv | [`arxiv`] | Atom XML | One call, full metadata in the listing |
//!
//! # Failure Model
//!
//! `scrape()` returns `Ok(vec![])` when a source is empty, unreachable or
//! unparsable, and drops single bad items with a log line. `Err` is reserved
//! for conditions that make the whole strategy meaningless (no browser,
//! missing required configuration).

pub mod arxiv;
pub mod browser;
pub mod html;
pub mod ieee;
pub mod openreview;

use crate::context::AppContext;
use crate::error::ScrapeError;
use crate::models::Paper;
use crate::task::{SourceKind, TaskConfig};
use tracing::info;
use url::Url;

/// A strategy bound to one task.
#[derive(Debug)]
pub enum Scraper<'a> {
    OpenReview(openreview::OpenReviewScraper<'a>),
    StaticHtml(html::HtmlScraper<'a>),
    Browser(browser::BrowserScraper<'a>),
    PaginatedRest(ieee::IeeeScraper<'a>),
    Arxiv(arxiv::ArxivScraper<'a>),
}

impl<'a> Scraper<'a> {
    pub fn new(config: TaskConfig, ctx: &'a AppContext) -> Self {
        match config.kind {
            SourceKind::OpenReview => {
                Scraper::OpenReview(openreview::OpenReviewScraper::new(config, ctx))
            }
            SourceKind::StaticHtml => Scraper::StaticHtml(html::HtmlScraper::new(config, ctx)),
            SourceKind::Browser => Scraper::Browser(browser::BrowserScraper::new(config, ctx)),
            SourceKind::PaginatedRest => {
                Scraper::PaginatedRest(ieee::IeeeScraper::new(config, ctx))
            }
            SourceKind::Arxiv => Scraper::Arxiv(arxiv::ArxivScraper::new(config, ctx)),
        }
    }

    pub async fn scrape(&self) -> Result<Vec<Paper>, ScrapeError> {
        match self {
            Scraper::OpenReview(s) => s.scrape().await,
            Scraper::StaticHtml(s) => s.scrape().await,
            Scraper::Browser(s) => s.scrape().await,
            Scraper::PaginatedRest(s) => s.scrape().await,
            Scraper::Arxiv(s) => s.scrape().await,
        }
    }
}

/// Truncate `items` to the task limit before any per-item work happens.
pub(crate) fn apply_limit<T>(mut items: Vec<T>, limit: Option<usize>, task: &str) -> Vec<T> {
    if let Some(limit) = limit {
        if items.len() > limit {
            info!(
                %task,
                limit,
                discovered = items.len(),
                "Applying limit before detail fetches"
            );
            items.truncate(limit);
        }
    }
    items
}

/// Resolve `href` against `base`, keeping only http(s) results.
pub(crate) fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let joined = base.join(href.trim()).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}
